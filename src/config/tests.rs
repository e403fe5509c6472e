use super::*;

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.render.pool_size.get(), 1);
    assert_eq!(settings.render.timeout, Duration::from_secs(30));
    assert!(settings.render.javascript);
    assert_eq!(settings.render.chrome_path, PathBuf::from("chromium"));
    assert!(!settings.render.accept_invalid_certs);
    assert!(settings.render.sandbox);
    assert!(settings.provider.enabled);
    assert_eq!(settings.provider.timeout, Duration::from_secs(10));
    assert_eq!(settings.provider.max_html_bytes, 512 * 1024);
    assert_eq!(settings.provider.user_agent, DEFAULT_USER_AGENT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.render.pool_size = Some(2);
    raw.logging.level = Some("info".to_string());

    let overrides = FetchOverrides {
        render_pool_size: Some(4),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_fetch_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.render.pool_size.get(), 4);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = FetchOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_fetch_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_pool_size_is_rejected() {
    let mut raw = RawSettings::default();
    raw.render.pool_size = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero pool rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "render.pool_size",
            ..
        }
    ));
}

#[test]
fn zero_timeouts_are_rejected() {
    let mut raw = RawSettings::default();
    raw.render.timeout_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw).expect_err("zero render timeout rejected"),
        LoadError::Invalid {
            key: "render.timeout_seconds",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.provider.timeout_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw).expect_err("zero provider timeout rejected"),
        LoadError::Invalid {
            key: "provider.timeout_seconds",
            ..
        }
    ));
}

#[test]
fn script_budget_must_fit_inside_timeout() {
    let mut raw = RawSettings::default();
    raw.render.timeout_seconds = Some(5);
    raw.render.script_budget_ms = Some(5_000);

    let err = Settings::from_raw(raw).expect_err("budget rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "render.script_budget_ms",
            ..
        }
    ));
}

#[test]
fn blank_user_agents_fall_back() {
    let mut raw = RawSettings::default();
    raw.render.user_agent = Some("   ".to_string());
    raw.provider.user_agent = Some(String::new());

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.render.user_agent.is_none());
    assert_eq!(settings.provider.user_agent, DEFAULT_USER_AGENT);
}

#[test]
fn invalid_log_level_is_reported() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    let err = Settings::from_raw(raw).expect_err("level rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn parse_fetch_arguments() {
    let args = CliArgs::parse_from([
        "linkpeek",
        "fetch",
        "--render-pool-size",
        "3",
        "--render-javascript",
        "false",
        "--provider-enabled",
        "no",
        "--blocking",
        "https://example.com/a",
        "https://example.com/b",
    ]);

    let Command::Fetch(fetch) = args.command;
    assert!(fetch.blocking);
    assert_eq!(fetch.overrides.render_pool_size, Some(3));
    assert_eq!(fetch.overrides.render_javascript, Some(false));
    assert_eq!(fetch.overrides.provider_enabled, Some(false));
    assert_eq!(
        fetch.urls.iter().map(Url::as_str).collect::<Vec<_>>(),
        vec!["https://example.com/a", "https://example.com/b"]
    );
}

#[test]
fn fetch_requires_a_url() {
    let result = CliArgs::try_parse_from(["linkpeek", "fetch"]);
    assert!(result.is_err());
}

#[test]
fn loads_settings_from_config_file() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("linkpeek.toml");
    std::fs::write(
        &path,
        r#"
[render]
pool_size = 3
timeout_seconds = 12
accept_invalid_certs = true

[provider]
enabled = false
"#,
    )
    .expect("write config");

    let args = CliArgs::parse_from([
        "linkpeek",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "fetch",
        "--render-timeout-seconds",
        "20",
        "https://example.com/",
    ]);
    let settings = load(&args).expect("settings load");

    assert_eq!(settings.render.pool_size.get(), 3);
    assert_eq!(settings.render.timeout, Duration::from_secs(20));
    assert!(settings.render.accept_invalid_certs);
    assert!(!settings.provider.enabled);
}
