//! Headless Chromium render engine.
//!
//! Each navigation runs the browser binary once with `--dump-dom`; the
//! serialized DOM printed after scripts settle is kept until the coordinator
//! extracts it.

use std::{
    io::ErrorKind,
    path::PathBuf,
    process::{self, Stdio},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};
use url::Url;

use crate::{
    application::render::{
        EngineError, RenderEngine, RenderEngineFactory, ServerTrustChallenge, TrustDecision,
        TrustPolicy,
    },
    config::RenderSettings,
};

use super::lock::mutex_lock;

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub binary: PathBuf,
    pub javascript: bool,
    pub trust: TrustPolicy,
    /// Parent of the per-slot browser profiles. Built from settings it is
    /// scoped to the current process so concurrent runs never share a
    /// profile lock.
    pub profile_root: PathBuf,
    /// Virtual time granted to page scripts before the DOM is dumped.
    pub script_budget: Duration,
    pub user_agent: Option<String>,
    pub sandbox: bool,
}

impl From<&RenderSettings> for ChromeConfig {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            binary: settings.chrome_path.clone(),
            javascript: settings.javascript,
            trust: TrustPolicy::from_accept_invalid_certs(settings.accept_invalid_certs),
            profile_root: settings
                .profile_dir
                .join(format!("pid-{}", process::id())),
            script_budget: settings.script_budget,
            user_agent: settings.user_agent.clone(),
            sandbox: settings.sandbox,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChromeEngineFactory {
    config: Arc<ChromeConfig>,
}

impl ChromeEngineFactory {
    pub fn new(config: ChromeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl RenderEngineFactory for ChromeEngineFactory {
    fn create(&self, slot: usize) -> Arc<dyn RenderEngine> {
        Arc::new(ChromeEngine::new(Arc::clone(&self.config), slot))
    }
}

pub struct ChromeEngine {
    config: Arc<ChromeConfig>,
    slot: usize,
    profile_dir: PathBuf,
    rendered: Mutex<Option<Vec<u8>>>,
}

impl ChromeEngine {
    pub fn new(config: Arc<ChromeConfig>, slot: usize) -> Self {
        let profile_dir = config.profile_root.join(format!("slot-{slot}"));
        Self {
            config,
            slot,
            profile_dir,
            rendered: Mutex::new(None),
        }
    }

    fn command(&self, url: &Url) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .arg("--no-first-run")
            .arg(format!("--user-data-dir={}", self.profile_dir.display()))
            .arg(format!(
                "--virtual-time-budget={}",
                self.config.script_budget.as_millis()
            ));

        let challenge = ServerTrustChallenge {
            host: url.host_str().unwrap_or_default(),
        };
        if self.config.trust.decide(&challenge) == TrustDecision::UseServerTrust {
            command.arg("--ignore-certificate-errors");
        }
        if !self.config.javascript {
            command.arg("--blink-settings=scriptEnabled=false");
        }
        if !self.config.sandbox {
            command.arg("--no-sandbox");
        }
        if let Some(agent) = self.config.user_agent.as_deref() {
            command.arg(format!("--user-agent={agent}"));
        }

        command
            .arg("--dump-dom")
            .arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn navigate(&self, url: &Url) -> Result<(), EngineError> {
        mutex_lock(&self.rendered, "infra::chrome", "navigate").take();

        let started_at = Instant::now();
        let output = self.command(url).output().await.map_err(|err| {
            let error_code = if err.kind() == ErrorKind::NotFound {
                "binary_missing"
            } else {
                "spawn"
            };
            warn!(
                target = "infra::chrome",
                op = "navigate",
                result = "error",
                slot = self.slot,
                url = %url,
                binary = %self.config.binary.display(),
                error_code,
                error = %err,
                "Failed to spawn Chromium"
            );
            EngineError::Spawn(err)
        })?;

        if !output.status.success() {
            let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "infra::chrome",
                op = "navigate",
                result = "error",
                slot = self.slot,
                url = %url,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code,
                stderr = %stderr,
                "Chromium exited unsuccessfully"
            );
            return Err(EngineError::navigation(format!(
                "chromium exited with status {exit_code}: {stderr}"
            )));
        }

        info!(
            target = "infra::chrome",
            op = "navigate",
            result = "ok",
            slot = self.slot,
            url = %url,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            dom_bytes = output.stdout.len(),
            "Chromium rendered page"
        );
        *mutex_lock(&self.rendered, "infra::chrome", "navigate") = Some(output.stdout);
        Ok(())
    }

    async fn extract_rendered_markup(&self) -> Result<String, EngineError> {
        let dom = mutex_lock(&self.rendered, "infra::chrome", "extract")
            .take()
            .ok_or(EngineError::NotLoaded)?;
        if dom.iter().all(u8::is_ascii_whitespace) {
            return Err(EngineError::extraction("Chromium returned an empty document"));
        }
        String::from_utf8(dom)
            .map_err(|err| EngineError::extraction(format!("document is not valid UTF-8: {err}")))
    }

    fn trust_policy(&self) -> TrustPolicy {
        self.config.trust
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};
    use tempfile::TempDir;

    fn make_executable(path: &Path) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    fn fake_chromium(dir: &TempDir, body: &str) -> PathBuf {
        let script_path = dir.path().join("fake-chromium");
        fs::write(&script_path, format!("#!/bin/sh\n{body}")).expect("write script");
        make_executable(&script_path);
        script_path
    }

    fn config(binary: PathBuf, dir: &TempDir) -> ChromeConfig {
        ChromeConfig {
            binary,
            javascript: true,
            trust: TrustPolicy::SystemDefault,
            profile_root: dir.path().join("profiles"),
            script_budget: Duration::from_millis(2500),
            user_agent: None,
            sandbox: true,
        }
    }

    #[test]
    fn profiles_from_settings_are_scoped_to_the_process() {
        let settings = RenderSettings {
            pool_size: std::num::NonZeroUsize::MIN,
            timeout: Duration::from_secs(30),
            javascript: true,
            chrome_path: PathBuf::from("chromium"),
            profile_dir: PathBuf::from("/var/tmp/linkpeek"),
            script_budget: Duration::from_secs(5),
            user_agent: None,
            accept_invalid_certs: false,
            sandbox: true,
        };

        let config = ChromeConfig::from(&settings);
        let engine = ChromeEngine::new(Arc::new(config), 2);

        let expected = PathBuf::from("/var/tmp/linkpeek")
            .join(format!("pid-{}", process::id()))
            .join("slot-2");
        assert_eq!(engine.profile_dir, expected);
    }

    fn page() -> Url {
        Url::parse("https://example.com/post").expect("valid url")
    }

    #[tokio::test]
    async fn dumps_dom_and_passes_flags() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let binary = fake_chromium(
            &dir,
            &format!(
                "echo \"$@\" > \"{}\"\necho '<html><head><title>Rendered</title></head></html>'\n",
                args_path.display()
            ),
        );
        let mut config = config(binary, &dir);
        config.user_agent = Some("linkpeek-test".to_string());
        let engine = ChromeEngine::new(Arc::new(config), 3);

        engine.navigate(&page()).await.expect("navigation succeeds");
        let markup = engine.extract_rendered_markup().await.expect("markup");
        assert!(markup.contains("<title>Rendered</title>"), "unexpected markup: {markup}");

        let args = fs::read_to_string(&args_path).expect("read args");
        assert!(args.contains("--dump-dom"), "missing --dump-dom: {args}");
        assert!(args.contains("--virtual-time-budget=2500"), "missing budget: {args}");
        assert!(args.contains("slot-3"), "missing per-slot profile: {args}");
        assert!(args.contains("--user-agent=linkpeek-test"), "missing user agent: {args}");
        assert!(args.trim_end().ends_with("https://example.com/post"), "url not last: {args}");
        assert!(!args.contains("--ignore-certificate-errors"));
        assert!(!args.contains("scriptEnabled=false"));
        assert!(!args.contains("--no-sandbox"));
    }

    #[tokio::test]
    async fn opt_in_flags_follow_configuration() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let binary = fake_chromium(
            &dir,
            &format!("echo \"$@\" > \"{}\"\necho '<html></html>'\n", args_path.display()),
        );
        let mut config = config(binary, &dir);
        config.javascript = false;
        config.sandbox = false;
        config.trust = TrustPolicy::AcceptAny;
        let engine = ChromeEngine::new(Arc::new(config), 0);

        assert_eq!(engine.trust_policy(), TrustPolicy::AcceptAny);
        engine.navigate(&page()).await.expect("navigation succeeds");

        let args = fs::read_to_string(&args_path).expect("read args");
        assert!(args.contains("--ignore-certificate-errors"), "{args}");
        assert!(args.contains("--blink-settings=scriptEnabled=false"), "{args}");
        assert!(args.contains("--no-sandbox"), "{args}");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_navigation_error() {
        let dir = TempDir::new().expect("temp dir");
        let binary = fake_chromium(&dir, "echo \"net::ERR_NAME_NOT_RESOLVED\" >&2\nexit 21\n");
        let engine = ChromeEngine::new(Arc::new(config(binary, &dir)), 0);

        match engine.navigate(&page()).await {
            Err(EngineError::Navigation { message }) => {
                assert!(message.contains("21"), "exit code missing: {message}");
                assert!(
                    message.contains("ERR_NAME_NOT_RESOLVED"),
                    "stderr did not propagate: {message}"
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            engine.extract_rendered_markup().await,
            Err(EngineError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = TempDir::new().expect("temp dir");
        let engine = ChromeEngine::new(
            Arc::new(config(dir.path().join("does-not-exist"), &dir)),
            0,
        );

        let err = engine.navigate(&page()).await.expect_err("spawn fails");
        assert!(matches!(err, EngineError::Spawn(ref io) if io.kind() == ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn empty_dom_is_an_extraction_error() {
        let dir = TempDir::new().expect("temp dir");
        let binary = fake_chromium(&dir, "echo\n");
        let engine = ChromeEngine::new(Arc::new(config(binary, &dir)), 0);

        engine.navigate(&page()).await.expect("navigation succeeds");
        assert!(matches!(
            engine.extract_rendered_markup().await,
            Err(EngineError::Extraction { .. })
        ));
    }

    #[tokio::test]
    async fn markup_is_extracted_once_per_navigation() {
        let dir = TempDir::new().expect("temp dir");
        let binary = fake_chromium(&dir, "echo '<html></html>'\n");
        let factory = ChromeEngineFactory::new(config(binary, &dir));
        let engine = factory.create(1);

        engine.navigate(&page()).await.expect("navigation succeeds");
        engine.extract_rendered_markup().await.expect("first extraction");
        assert!(matches!(
            engine.extract_rendered_markup().await,
            Err(EngineError::NotLoaded)
        ));
    }
}
