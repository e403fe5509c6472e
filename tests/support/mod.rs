//! Scripted in-memory render engine shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use linkpeek::application::render::{
    CoordinatorConfig, EngineError, OpenGraphNormalizer, RenderCoordinator, RenderEngine,
    RenderEngineFactory,
};
use url::Url;

#[derive(Debug, Clone)]
pub enum Step {
    /// Navigate after `delay`, then serve `<title>{title}</title>`.
    Page { delay: Duration, title: String },
    FailNavigation { delay: Duration, message: String },
    FailExtraction { delay: Duration, message: String },
}

impl Step {
    fn delay(&self) -> Duration {
        match self {
            Step::Page { delay, .. }
            | Step::FailNavigation { delay, .. }
            | Step::FailExtraction { delay, .. } => *delay,
        }
    }
}

/// Behaviour per URL plus a log of every navigation, shared by all engines.
#[derive(Default)]
pub struct Script {
    steps: Mutex<HashMap<String, Step>>,
    default_delay: Mutex<Duration>,
    navigations: Mutex<Vec<String>>,
    engines_created: AtomicUsize,
}

impl Script {
    pub fn new(default_delay: Duration) -> Arc<Self> {
        let script = Self::default();
        *script.default_delay.lock().expect("delay lock") = default_delay;
        Arc::new(script)
    }

    pub fn on(&self, url: &Url, step: Step) {
        self.steps
            .lock()
            .expect("steps lock")
            .insert(url.as_str().to_string(), step);
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().expect("navigations lock").clone()
    }

    pub fn engines_created(&self) -> usize {
        self.engines_created.load(Ordering::SeqCst)
    }

    fn step_for(&self, url: &Url) -> Step {
        self.steps
            .lock()
            .expect("steps lock")
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| Step::Page {
                delay: *self.default_delay.lock().expect("delay lock"),
                title: title_for(url),
            })
    }
}

pub fn title_for(url: &Url) -> String {
    format!("Title of {}", url.path())
}

pub struct ScriptedEngine {
    script: Arc<Script>,
    loaded: Mutex<Option<Step>>,
}

#[async_trait]
impl RenderEngine for ScriptedEngine {
    async fn navigate(&self, url: &Url) -> Result<(), EngineError> {
        self.script
            .navigations
            .lock()
            .expect("navigations lock")
            .push(url.as_str().to_string());

        let step = self.script.step_for(url);
        tokio::time::sleep(step.delay()).await;

        if let Step::FailNavigation { message, .. } = &step {
            return Err(EngineError::navigation(message.clone()));
        }
        *self.loaded.lock().expect("loaded lock") = Some(step);
        Ok(())
    }

    async fn extract_rendered_markup(&self) -> Result<String, EngineError> {
        match self.loaded.lock().expect("loaded lock").take() {
            Some(Step::Page { title, .. }) => {
                Ok(format!("<html><head><title>{title}</title></head></html>"))
            }
            Some(Step::FailExtraction { message, .. }) => Err(EngineError::extraction(message)),
            Some(Step::FailNavigation { .. }) | None => Err(EngineError::NotLoaded),
        }
    }
}

pub fn factory(script: &Arc<Script>) -> Arc<dyn RenderEngineFactory> {
    let script = Arc::clone(script);
    Arc::new(move |_slot: usize| -> Arc<dyn RenderEngine> {
        script.engines_created.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedEngine {
            script: Arc::clone(&script),
            loaded: Mutex::new(None),
        })
    })
}

pub fn coordinator(script: &Arc<Script>, pool_size: usize, timeout: Duration) -> RenderCoordinator {
    RenderCoordinator::spawn(
        CoordinatorConfig {
            pool_size: NonZeroUsize::new(pool_size).expect("non-zero pool"),
            render_timeout: timeout,
        },
        factory(script),
        Arc::new(OpenGraphNormalizer),
    )
}

pub fn url(path: &str) -> Url {
    Url::parse("https://pages.example.com/")
        .expect("base url")
        .join(path)
        .expect("valid path")
}
