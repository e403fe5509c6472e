use std::{process, sync::Arc};

use futures::future::join_all;
use linkpeek::{
    application::{
        blocking::{BlockingError, BlockingPreviewClient},
        error::AppError,
        preview::PreviewService,
        provider::MetadataProvider,
        render::{
            CoordinatorConfig, MetadataNormalizer, OpenGraphNormalizer, PreviewFailure,
            RenderCoordinator,
        },
    },
    config::{self, Command, Settings},
    domain::MetadataRecord,
    infra::{
        chrome::{ChromeConfig, ChromeEngineFactory},
        error::InfraError,
        http_provider::{HttpMetadataProvider, ProviderConfig},
        telemetry,
    },
};
use serde::Serialize;
use tokio::runtime::Builder;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.messages(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error.messages(), "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Fetch(args) if args.blocking => run_fetch_blocking(&settings, &args.urls),
        Command::Fetch(args) => run_fetch(&settings, &args.urls),
    }
}

fn run_fetch(settings: &Settings, urls: &[Url]) -> Result<(), AppError> {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(InfraError::from)?;
    let provider = build_provider(settings)?;

    runtime.block_on(async {
        let service = build_service(settings, provider);
        let service = &service;
        let outcomes = join_all(
            urls.iter()
                .map(|url| async move { (url, service.fetch_preview_detailed(url).await) }),
        )
        .await;

        for (url, outcome) in outcomes {
            print_outcome(url, outcome)?;
        }
        Ok::<(), AppError>(())
    })
}

fn run_fetch_blocking(settings: &Settings, urls: &[Url]) -> Result<(), AppError> {
    let provider = build_provider(settings)?;
    let client = BlockingPreviewClient::new(|| build_service(settings, provider))?;

    for url in urls {
        let outcome = match client.fetch_preview_detailed(url) {
            Ok(record) => Ok(record),
            Err(BlockingError::Preview(failure)) => Err(failure),
            Err(err) => return Err(err.into()),
        };
        print_outcome(url, outcome)?;
    }
    Ok(())
}

fn build_provider(settings: &Settings) -> Result<Option<Arc<dyn MetadataProvider>>, AppError> {
    if !settings.provider.enabled {
        info!(
            target = "linkpeek::main",
            op = "build_provider",
            result = "disabled",
            "Static metadata provider disabled; every preview renders"
        );
        return Ok(None);
    }

    let normalizer: Arc<dyn MetadataNormalizer> = Arc::new(OpenGraphNormalizer);
    let provider =
        HttpMetadataProvider::new(ProviderConfig::from(&settings.provider), normalizer)?;
    Ok(Some(Arc::new(provider)))
}

/// Must run inside the runtime that will drive the coordinator.
fn build_service(
    settings: &Settings,
    provider: Option<Arc<dyn MetadataProvider>>,
) -> PreviewService {
    let coordinator = RenderCoordinator::spawn(
        CoordinatorConfig::from(&settings.render),
        Arc::new(ChromeEngineFactory::new(ChromeConfig::from(&settings.render))),
        Arc::new(OpenGraphNormalizer),
    );

    let service = PreviewService::new(coordinator);
    match provider {
        Some(provider) => service.with_provider(provider),
        None => service,
    }
}

#[derive(Serialize)]
struct PreviewLine<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<MetadataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_outcome(
    url: &Url,
    outcome: Result<MetadataRecord, PreviewFailure>,
) -> Result<(), AppError> {
    let line = match outcome {
        Ok(record) => PreviewLine {
            url: url.as_str(),
            preview: Some(record),
            error: None,
        },
        Err(failure) => PreviewLine {
            url: url.as_str(),
            preview: None,
            error: Some(failure.to_string()),
        },
    };
    let json = serde_json::to_string(&line)
        .map_err(|err| AppError::unexpected(format!("failed to encode preview: {err}")))?;
    println!("{json}");
    Ok(())
}
