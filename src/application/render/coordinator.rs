//! Request coordinator for the render fallback.
//!
//! All scheduling state (engine slots, waiter lists, wait queue) is owned by
//! one actor task. [`RenderCoordinator`] handles send it requests; engine
//! tasks and timeout guards report back through a private event channel, so
//! every state transition happens on that single task.

use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use metrics::{counter, gauge, histogram};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    normalize::MetadataNormalizer,
    timeout::TimeoutGuard,
    types::{
        PreviewFailure, PreviewOutcome, RenderEngine, RenderEngineFactory, Waiter,
    },
};

pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

const METRIC_RENDER_STARTED: &str = "linkpeek_render_started_total";
const METRIC_RENDER_COALESCED: &str = "linkpeek_render_coalesced_total";
const METRIC_RENDER_QUEUED: &str = "linkpeek_render_queued_total";
const METRIC_RENDER_TIMEOUT: &str = "linkpeek_render_timeout_total";
const METRIC_RENDER_LATE: &str = "linkpeek_render_late_completion_total";
const METRIC_RENDER_FAILED: &str = "linkpeek_render_failed_total";
const METRIC_RENDER_QUEUE_LEN: &str = "linkpeek_render_queue_len";
const METRIC_RENDER_MS: &str = "linkpeek_render_ms";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on simultaneously live render engines.
    pub pool_size: NonZeroUsize,
    /// Time allowed from navigation start to completion.
    pub render_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pool_size: NonZeroUsize::MIN,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }
}

impl From<&crate::config::RenderSettings> for CoordinatorConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            pool_size: settings.pool_size,
            render_timeout: settings.timeout,
        }
    }
}

/// Point-in-time view of the coordinator state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// Engines created so far.
    pub engines: usize,
    /// URLs currently assigned to an engine, by slot order.
    pub active: Vec<Url>,
    /// URLs waiting for a free engine, in service order.
    pub queued: Vec<Url>,
}

/// Cloneable handle to a running coordinator.
///
/// The actor stops once every handle has been dropped; renders still in
/// flight are abandoned and their waiters resolve with
/// [`PreviewFailure::Closed`].
#[derive(Clone)]
pub struct RenderCoordinator {
    requests: mpsc::UnboundedSender<Request>,
}

impl RenderCoordinator {
    /// Spawn the coordinator actor on the current Tokio runtime.
    pub fn spawn(
        config: CoordinatorConfig,
        factory: Arc<dyn RenderEngineFactory>,
        normalizer: Arc<dyn MetadataNormalizer>,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            target = "application::render::coordinator",
            op = "spawn",
            pool_size = config.pool_size.get(),
            timeout_secs = config.render_timeout.as_secs(),
            "Render coordinator starting"
        );

        let state = CoordinatorState::new(config, factory, normalizer, events_tx);
        tokio::spawn(state.run(requests_rx, events_rx));

        Self {
            requests: requests_tx,
        }
    }

    /// Register `on_complete` for `url`. Never blocks and never rejects;
    /// the callback fires exactly once.
    pub fn request<F>(&self, url: Url, on_complete: F)
    where
        F: FnOnce(PreviewOutcome) + Send + 'static,
    {
        let request = Request::Preview {
            url,
            waiter: PendingWaiter {
                callback: Box::new(on_complete),
                requested_at: Instant::now(),
            },
        };

        if let Err(mpsc::error::SendError(Request::Preview { url, waiter })) =
            self.requests.send(request)
        {
            warn!(
                target = "application::render::coordinator",
                op = "request",
                result = "closed",
                url = %url,
                "Render coordinator stopped; failing request immediately"
            );
            waiter.deliver(url.as_str(), Err(PreviewFailure::Closed));
        }
    }

    /// Render `url` and wait for the shared outcome.
    pub async fn render(&self, url: Url) -> PreviewOutcome {
        let (tx, rx) = oneshot::channel();
        self.request(url, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or(Err(PreviewFailure::Closed))
    }

    /// Current slot and queue state, or `None` once the actor has stopped.
    pub async fn snapshot(&self) -> Option<CoordinatorSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.requests.send(Request::Snapshot { reply }).ok()?;
        rx.await.ok()
    }
}

enum Request {
    Preview { url: Url, waiter: PendingWaiter },
    Snapshot { reply: oneshot::Sender<CoordinatorSnapshot> },
}

enum EngineEvent {
    Finished {
        slot: usize,
        token: RenderToken,
        outcome: PreviewOutcome,
    },
    TimedOut {
        slot: usize,
        token: RenderToken,
    },
}

/// Identity of one navigation; stale events carry an outdated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderToken(u64);

struct PendingWaiter {
    callback: Waiter,
    requested_at: Instant,
}

impl PendingWaiter {
    /// Run the callback; a panicking callback is contained so the actor and
    /// the remaining waiters keep going.
    fn deliver(self, url: &str, outcome: PreviewOutcome) {
        let callback = self.callback;
        if panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
            warn!(
                target = "application::render::coordinator",
                op = "deliver",
                result = "waiter_panicked",
                url = %url,
                "Waiter callback panicked"
            );
        }
    }
}

struct EngineSlot {
    engine: Arc<dyn RenderEngine>,
    current: Option<ActiveRender>,
}

struct ActiveRender {
    url: Url,
    token: RenderToken,
    timeout: TimeoutGuard,
    navigation: AbortOnDrop,
    started_at: Instant,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct CoordinatorState {
    config: CoordinatorConfig,
    factory: Arc<dyn RenderEngineFactory>,
    normalizer: Arc<dyn MetadataNormalizer>,
    events: mpsc::UnboundedSender<EngineEvent>,
    slots: Vec<EngineSlot>,
    waiters: HashMap<String, Vec<PendingWaiter>>,
    queue: VecDeque<Url>,
    next_token: u64,
}

impl CoordinatorState {
    fn new(
        config: CoordinatorConfig,
        factory: Arc<dyn RenderEngineFactory>,
        normalizer: Arc<dyn MetadataNormalizer>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            factory,
            normalizer,
            events,
            slots: Vec::new(),
            waiters: HashMap::new(),
            queue: VecDeque::new(),
            next_token: 0,
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
            }
        }
        self.shutdown();
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Preview { url, waiter } => self.enqueue_waiter(url, waiter),
            Request::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Finished {
                slot,
                token,
                outcome,
            } => self.on_engine_finished(slot, token, outcome),
            EngineEvent::TimedOut { slot, token } => {
                let after = self.config.render_timeout;
                self.on_engine_finished(slot, token, Err(PreviewFailure::Timeout { after }));
            }
        }
    }

    fn enqueue_waiter(&mut self, url: Url, waiter: PendingWaiter) {
        if let Some(waiters) = self.waiters.get_mut(url.as_str()) {
            waiters.push(waiter);
            let waiting = waiters.len();
            let result = if self.slot_rendering(&url).is_some() {
                "joined_render"
            } else {
                "joined_queue"
            };
            counter!(METRIC_RENDER_COALESCED).increment(1);
            debug!(
                target = "application::render::coordinator",
                op = "request",
                result,
                url = %url,
                waiters = waiting,
                "Request attached to an existing render"
            );
            return;
        }

        self.waiters.insert(url.as_str().to_owned(), vec![waiter]);

        match self.idle_slot() {
            Some(slot) => self.start_render(slot, url),
            None => {
                self.queue.push_back(url.clone());
                counter!(METRIC_RENDER_QUEUED).increment(1);
                gauge!(METRIC_RENDER_QUEUE_LEN).set(self.queue.len() as f64);
                info!(
                    target = "application::render::coordinator",
                    op = "request",
                    result = "queued",
                    url = %url,
                    queue_len = self.queue.len(),
                    "All render engines busy; request queued"
                );
            }
        }
    }

    fn slot_rendering(&self, url: &Url) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.current
                .as_ref()
                .is_some_and(|active| active.url == *url)
        })
    }

    /// First idle slot, creating a new engine while under the pool bound.
    fn idle_slot(&mut self) -> Option<usize> {
        if let Some(index) = self.slots.iter().position(|slot| slot.current.is_none()) {
            return Some(index);
        }
        if self.slots.len() >= self.config.pool_size.get() {
            return None;
        }

        let index = self.slots.len();
        let engine = self.factory.create(index);
        info!(
            target = "application::render::coordinator",
            op = "create_engine",
            slot = index,
            trust = ?engine.trust_policy(),
            "Render engine created"
        );
        self.slots.push(EngineSlot {
            engine,
            current: None,
        });
        Some(index)
    }

    fn start_render(&mut self, slot: usize, url: Url) {
        let token = RenderToken(self.next_token);
        self.next_token += 1;

        let timeout = TimeoutGuard::arm(self.config.render_timeout, {
            let events = self.events.clone();
            move || {
                let _ = events.send(EngineEvent::TimedOut { slot, token });
            }
        });

        let engine = Arc::clone(&self.slots[slot].engine);
        let normalizer = Arc::clone(&self.normalizer);
        let events = self.events.clone();
        let target = url.clone();
        let navigation = tokio::spawn(async move {
            let outcome = render_page(engine.as_ref(), normalizer.as_ref(), &target).await;
            let _ = events.send(EngineEvent::Finished {
                slot,
                token,
                outcome,
            });
        });

        counter!(METRIC_RENDER_STARTED).increment(1);
        info!(
            target = "application::render::coordinator",
            op = "start_render",
            url = %url,
            slot,
            token = token.0,
            timeout_secs = timeout.bound().as_secs(),
            "Render started"
        );

        self.slots[slot].current = Some(ActiveRender {
            url,
            token,
            timeout,
            navigation: AbortOnDrop(navigation),
            started_at: Instant::now(),
        });
    }

    fn on_engine_finished(&mut self, slot: usize, token: RenderToken, outcome: PreviewOutcome) {
        let Some(engine_slot) = self.slots.get_mut(slot) else {
            warn!(
                target = "application::render::coordinator",
                op = "finish",
                result = "unknown_slot",
                slot,
                "Completion for an engine slot that does not exist"
            );
            return;
        };

        let current = engine_slot
            .current
            .take_if(|active| active.token == token);
        let Some(ActiveRender {
            url,
            mut timeout,
            navigation,
            started_at,
            ..
        }) = current
        else {
            counter!(METRIC_RENDER_LATE).increment(1);
            debug!(
                target = "application::render::coordinator",
                op = "finish",
                result = "stale",
                slot,
                token = token.0,
                "Ignoring completion for a render that already finished"
            );
            return;
        };

        timeout.disarm();
        drop(navigation);

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_RENDER_MS).record(elapsed_ms as f64);
        if let Err(failure) = &outcome {
            counter!(METRIC_RENDER_FAILED, "kind" => failure.kind().as_str()).increment(1);
            if matches!(failure, PreviewFailure::Timeout { .. }) {
                counter!(METRIC_RENDER_TIMEOUT).increment(1);
            }
        }

        let waiters = self.waiters.remove(url.as_str()).unwrap_or_default();
        if waiters.is_empty() {
            warn!(
                target = "application::render::coordinator",
                op = "finish",
                result = "no_waiters",
                url = %url,
                slot,
                "Render finished without registered waiters"
            );
        } else {
            let result = match &outcome {
                Ok(_) => "ok",
                Err(failure) => failure.kind().as_str(),
            };
            info!(
                target = "application::render::coordinator",
                op = "finish",
                result,
                url = %url,
                slot,
                token = token.0,
                elapsed_ms,
                waiters = waiters.len(),
                "Render finished"
            );
            for waiter in waiters {
                let waited_ms = waiter.requested_at.elapsed().as_millis() as u64;
                debug!(
                    target = "application::render::coordinator",
                    op = "deliver",
                    url = %url,
                    waited_ms,
                    "Delivering render outcome"
                );
                waiter.deliver(url.as_str(), outcome.clone());
            }
        }

        self.advance_queue(slot);
    }

    fn advance_queue(&mut self, slot: usize) {
        match self.queue.pop_front() {
            Some(next) => {
                gauge!(METRIC_RENDER_QUEUE_LEN).set(self.queue.len() as f64);
                debug!(
                    target = "application::render::coordinator",
                    op = "dequeue",
                    url = %next,
                    slot,
                    queue_len = self.queue.len(),
                    "Handing queued request to freed engine"
                );
                self.start_render(slot, next);
            }
            None => {
                debug!(
                    target = "application::render::coordinator",
                    op = "dequeue",
                    slot,
                    "Render engine idle"
                );
            }
        }
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            engines: self.slots.len(),
            active: self
                .slots
                .iter()
                .filter_map(|slot| slot.current.as_ref().map(|active| active.url.clone()))
                .collect(),
            queued: self.queue.iter().cloned().collect(),
        }
    }

    fn shutdown(&mut self) {
        let abandoned = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.current.take())
            .count();
        self.queue.clear();
        gauge!(METRIC_RENDER_QUEUE_LEN).set(0.0);

        let waiters: Vec<(String, PendingWaiter)> = self
            .waiters
            .drain()
            .flat_map(|(url, waiters)| {
                waiters
                    .into_iter()
                    .map(move |waiter| (url.clone(), waiter))
            })
            .collect();
        info!(
            target = "application::render::coordinator",
            op = "shutdown",
            abandoned,
            waiters = waiters.len(),
            "Render coordinator stopped"
        );
        for (url, waiter) in waiters {
            waiter.deliver(&url, Err(PreviewFailure::Closed));
        }
    }
}

async fn render_page(
    engine: &dyn RenderEngine,
    normalizer: &dyn MetadataNormalizer,
    url: &Url,
) -> PreviewOutcome {
    engine.navigate(url).await?;
    let markup = engine.extract_rendered_markup().await?;
    Ok(normalizer.normalize(url, &markup))
}
