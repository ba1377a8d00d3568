use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use teloxide::types::Update;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::command::{self, Parsed};
use crate::dispatcher::Dispatcher;
use crate::platform::telegram::normalize;
use crate::platform::{BotIdentity, Normalized, Transport, TransportError};
use crate::store::AliasStore;

/// Lifecycle of the ingestion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("ingestion cannot start while {0:?}")]
    AlreadyStarted(ControllerState),
    #[error("ingestion is not accepting updates ({0:?})")]
    NotRunning(ControllerState),
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    /// Run the long-poll loop in addition to the webhook feed.
    pub polling: bool,
    pub poll_timeout: Duration,
    /// Pause after a failed poll, unless the platform says how long to wait.
    pub error_backoff: Duration,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            polling: false,
            poll_timeout: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Webhook,
    Poll,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Webhook => write!(f, "webhook"),
            Source::Poll => write!(f, "poll"),
        }
    }
}

/// normalize → parse → dispatch → deliver, shared by both intake channels.
struct Pipeline {
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    bot: BotIdentity,
}

impl Pipeline {
    async fn process_update(&self, update: Update, source: Source) {
        let message = match normalize(&update) {
            Normalized::Message(message) => message,
            Normalized::Ignored => {
                debug!(update_id = update.id.0, %source, "Ignored update");
                return;
            }
        };
        let update_id = message.update_id;

        let command = match command::parse(&message, &self.bot) {
            Parsed::Command(command) => command,
            Parsed::NotAddressed => return,
        };

        info!(
            update_id,
            %source,
            user = message.sender.0,
            alias = %command.alias,
            "Dispatching command"
        );

        let reply = match self.dispatcher.dispatch(&command, message.sender).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(update_id, "Failed to dispatch update: {:#}", e);
                return;
            }
        };

        // Best effort: delivery failures are the transport's to retry, not ours.
        if let Err(e) = self.transport.send_reply(message.reply_target(), &reply).await {
            warn!(update_id, "Failed to deliver reply: {}", e);
        }
    }

    /// Log a poll failure and decide how long to wait before polling again.
    fn on_poll_error(&self, err: &TransportError, backoff: Duration) -> Duration {
        match err {
            TransportError::RateLimited(wait) => {
                warn!("Polling rate limited, waiting {:?}", wait);
                *wait
            }
            other => {
                error!("Polling error: {}", other);
                backoff
            }
        }
    }
}

struct Run {
    cancel: CancellationToken,
    poll_task: Option<JoinHandle<Option<i32>>>,
}

/// Owns both intake channels: webhook deliveries handed to [`accept`] and the
/// optional long-poll loop.
///
/// [`accept`]: IngestionController::accept
pub struct IngestionController {
    pipeline: Arc<Pipeline>,
    options: IngestionOptions,
    state: RwLock<ControllerState>,
    /// Webhook dispatches still in flight.
    tracker: TaskTracker,
    /// Next update id to request; kept across restarts.
    offset: Mutex<Option<i32>>,
    run: AsyncMutex<Option<Run>>,
}

impl IngestionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn AliasStore>,
        bot: BotIdentity,
        options: IngestionOptions,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                transport,
                dispatcher: Dispatcher::new(store),
                bot,
            }),
            options,
            state: RwLock::new(ControllerState::Stopped),
            tracker: TaskTracker::new(),
            offset: Mutex::new(None),
            run: AsyncMutex::new(None),
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut run = self.run.lock().await;
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if *state != ControllerState::Stopped {
                return Err(LifecycleError::AlreadyStarted(*state));
            }
            *state = ControllerState::Starting;
        }

        let cancel = CancellationToken::new();
        self.tracker.reopen();

        let poll_task = if self.options.polling {
            let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
            Some(tokio::spawn(poll_loop(
                Arc::clone(&self.pipeline),
                self.options.clone(),
                cancel.clone(),
                offset,
            )))
        } else {
            None
        };

        *run = Some(Run { cancel, poll_task });
        self.set_state(ControllerState::Running);
        info!(polling = self.options.polling, "Ingestion running");
        Ok(())
    }

    /// Queue a webhook-delivered update. Returns once the update is accepted;
    /// processing continues in the background.
    pub fn accept(&self, update: Update) -> Result<(), LifecycleError> {
        // Hold the read lock while spawning so stop() can't slip between the
        // check and the spawn and miss this task.
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if *state != ControllerState::Running {
            return Err(LifecycleError::NotRunning(*state));
        }

        let pipeline = Arc::clone(&self.pipeline);
        self.tracker.spawn(async move {
            pipeline.process_update(update, Source::Webhook).await;
        });
        Ok(())
    }

    /// Cancel the poll loop, refuse new webhook updates and wait for in-flight
    /// dispatches. Stopping a stopped controller is a no-op.
    pub async fn stop(&self, reason: &str) {
        let mut run = self.run.lock().await;
        let Some(current) = run.take() else {
            return;
        };

        self.set_state(ControllerState::Stopping);
        info!(reason, "Stopping ingestion");

        current.cancel.cancel();
        self.tracker.close();

        if let Some(task) = current.poll_task {
            match task.await {
                Ok(offset) => {
                    *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = offset;
                }
                Err(e) => error!("Poll loop task failed: {}", e),
            }
        }
        self.tracker.wait().await;

        self.set_state(ControllerState::Stopped);
        info!("Ingestion stopped");
    }
}

/// getUpdates offset confirming everything up to `update_id`.
fn next_offset(update_id: u32) -> Option<i32> {
    i32::try_from(update_id).ok()?.checked_add(1)
}

/// Long-poll until cancelled; returns the offset to resume from.
async fn poll_loop(
    pipeline: Arc<Pipeline>,
    options: IngestionOptions,
    cancel: CancellationToken,
    mut offset: Option<i32>,
) -> Option<i32> {
    info!(?offset, "Long polling started");

    while !cancel.is_cancelled() {
        match pipeline
            .transport
            .poll(offset, options.poll_timeout, &cancel)
            .await
        {
            Ok(batch) => {
                for update in batch {
                    // Unprocessed updates stay unconfirmed and are redelivered after restart.
                    if cancel.is_cancelled() {
                        break;
                    }
                    let update_id = update.id.0;
                    pipeline.process_update(update, Source::Poll).await;
                    match next_offset(update_id) {
                        Some(next) => offset = Some(next),
                        None => warn!(update_id, "Update id out of offset range"),
                    }
                }
            }
            Err(err) => {
                let wait = pipeline.on_poll_error(&err, options.error_backoff);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    info!(?offset, "Long polling stopped");
    offset
}
