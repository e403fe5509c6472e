//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "linkpeek";
const ENV_PREFIX: &str = "LINKPEEK";
const DEFAULT_RENDER_POOL_SIZE: u64 = 1;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SCRIPT_BUDGET_MS: u64 = 5_000;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROVIDER_MAX_HTML_BYTES: u64 = 512 * 1024;
pub(crate) const DEFAULT_CHROME_PATH: &str = "chromium";
pub(crate) const DEFAULT_PROFILE_DIR: &str = "/tmp/linkpeek-chromium";
pub(crate) const DEFAULT_USER_AGENT: &str = concat!("linkpeek/", env!("CARGO_PKG_VERSION"));

/// Command-line arguments for the linkpeek binary.
#[derive(Debug, Parser)]
#[command(name = "linkpeek", version, about = "Link preview metadata fetcher")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "LINKPEEK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fetch preview metadata and print one JSON record per URL.
    Fetch(FetchArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub overrides: FetchOverrides,

    /// Resolve previews through the blocking client instead of the async service.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub blocking: bool,

    /// Pages to preview.
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<Url>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FetchOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the number of render engines.
    #[arg(long = "render-pool-size", value_name = "COUNT")]
    pub render_pool_size: Option<u64>,

    /// Override the per-render timeout.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Toggle page scripts in the render engine.
    #[arg(
        long = "render-javascript",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub render_javascript: Option<bool>,

    /// Override the Chromium executable path.
    #[arg(long = "render-chrome-path", value_name = "PATH")]
    pub render_chrome_path: Option<PathBuf>,

    /// Accept any certificate presented by rendered sites.
    #[arg(
        long = "render-accept-invalid-certs",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub render_accept_invalid_certs: Option<bool>,

    /// Toggle the static HTTP provider.
    #[arg(
        long = "provider-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub provider_enabled: Option<bool>,

    /// Override the static HTTP provider timeout.
    #[arg(long = "provider-timeout-seconds", value_name = "SECONDS")]
    pub provider_timeout_seconds: Option<u64>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub provider: ProviderSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub pool_size: NonZeroUsize,
    pub timeout: Duration,
    pub javascript: bool,
    pub chrome_path: PathBuf,
    pub profile_dir: PathBuf,
    pub script_budget: Duration,
    pub user_agent: Option<String>,
    pub accept_invalid_certs: bool,
    pub sandbox: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub timeout: Duration,
    pub max_html_bytes: usize,
    pub user_agent: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Fetch(args) => raw.apply_fetch_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    provider: RawProviderSettings,
}

impl RawSettings {
    fn apply_fetch_overrides(&mut self, overrides: &FetchOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(size) = overrides.render_pool_size {
            self.render.pool_size = Some(size);
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
        if let Some(javascript) = overrides.render_javascript {
            self.render.javascript = Some(javascript);
        }
        if let Some(path) = overrides.render_chrome_path.as_ref() {
            self.render.chrome_path = Some(path.clone());
        }
        if let Some(accept) = overrides.render_accept_invalid_certs {
            self.render.accept_invalid_certs = Some(accept);
        }
        if let Some(enabled) = overrides.provider_enabled {
            self.provider.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.provider_timeout_seconds {
            self.provider.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            provider,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            provider: build_provider_settings(provider)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let pool_size = non_zero_usize(
        render.pool_size.unwrap_or(DEFAULT_RENDER_POOL_SIZE),
        "render.pool_size",
    )?;
    let timeout = non_zero_duration(
        render.timeout_seconds.unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
        "render.timeout_seconds",
    )?;

    let chrome_path = render
        .chrome_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHROME_PATH));
    if chrome_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.chrome_path",
            "path must not be empty",
        ));
    }

    let profile_dir = render
        .profile_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE_DIR));
    if profile_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.profile_dir",
            "path must not be empty",
        ));
    }

    let script_budget =
        Duration::from_millis(render.script_budget_ms.unwrap_or(DEFAULT_SCRIPT_BUDGET_MS));
    if script_budget >= timeout {
        return Err(LoadError::invalid(
            "render.script_budget_ms",
            "must be shorter than render.timeout_seconds",
        ));
    }

    let user_agent = render.user_agent.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(RenderSettings {
        pool_size,
        timeout,
        javascript: render.javascript.unwrap_or(true),
        chrome_path,
        profile_dir,
        script_budget,
        user_agent,
        accept_invalid_certs: render.accept_invalid_certs.unwrap_or(false),
        sandbox: render.sandbox.unwrap_or(true),
    })
}

fn build_provider_settings(provider: RawProviderSettings) -> Result<ProviderSettings, LoadError> {
    let timeout = non_zero_duration(
        provider
            .timeout_seconds
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
        "provider.timeout_seconds",
    )?;
    let max_html_bytes = non_zero_usize(
        provider
            .max_html_bytes
            .unwrap_or(DEFAULT_PROVIDER_MAX_HTML_BYTES),
        "provider.max_html_bytes",
    )?;

    let user_agent = provider
        .user_agent
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    Ok(ProviderSettings {
        enabled: provider.enabled.unwrap_or(true),
        timeout,
        max_html_bytes: max_html_bytes.get(),
        user_agent,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    pool_size: Option<u64>,
    timeout_seconds: Option<u64>,
    javascript: Option<bool>,
    chrome_path: Option<PathBuf>,
    profile_dir: Option<PathBuf>,
    script_budget_ms: Option<u64>,
    user_agent: Option<String>,
    accept_invalid_certs: Option<bool>,
    sandbox: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProviderSettings {
    enabled: Option<bool>,
    timeout_seconds: Option<u64>,
    max_html_bytes: Option<u64>,
    user_agent: Option<String>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_duration(seconds: u64, key: &'static str) -> Result<Duration, LoadError> {
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests;
