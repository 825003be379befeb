/**
 * Change Stream Subscription
 *
 * This module owns the lifecycle of one live subscription to the upstream
 * change feed. Raw payloads are classified into `ChangeEvent`s and handed to
 * the owner's callback; the subscription never touches the collection itself.
 *
 * # State Machine
 *
 * ```text
 * Idle -> Starting -> Active -> (Disconnected -> Reconnecting -> Active)* -> Stopped
 * ```
 *
 * - `start()` on a running subscription is a no-op, so a second feed is never opened
 * - `stop()` is idempotent and waits for the background task to finish, so no
 *   notice is delivered once it returns
 * - `Stopped` is terminal; a new `ChangeSubscription` is needed to resume
 *
 * # Reconnection
 *
 * A transport error or the end of the feed moves the subscription to
 * `Disconnected`, then `Reconnecting` with exponential backoff. Nothing is
 * buffered across the gap: once the feed is back, the owner receives
 * `SubscriptionNotice::Resynchronize` and is expected to re-seed from a bulk load.
 *
 * # Cancellation
 *
 * A stop flag is checked before connecting, raced against every suspension
 * point, and checked again after the transport resolves, so a `stop()` issued
 * during setup means the subscription never becomes `Active`.
 */
use futures_util::StreamExt;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::shared::error::SyncError;
use crate::shared::event::{ChangeEvent, RawChangePayload};
use crate::sync::retry::{Backoff, BackoffStrategy};
use crate::sync::store::{ChangeFeed, ChangeScope, ChangeTransport};

/// Lifecycle state of a change subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created, never started
    Idle,
    /// Opening the first feed
    Starting,
    /// Feed open, events flowing
    Active,
    /// Feed lost
    Disconnected,
    /// Waiting to open a new feed
    Reconnecting,
    /// Torn down for good
    Stopped,
}

impl SubscriptionState {
    /// Whether a background task owns (or is acquiring) a feed
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Active | Self::Disconnected | Self::Reconnecting
        )
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Active => write!(f, "Active"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// What the subscription reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionNotice {
    /// A classified change event
    Event(ChangeEvent),
    /// A payload that failed classification and was dropped
    Rejected(SyncError),
    /// The feed came back after a gap; events may have been missed
    Resynchronize,
}

/// Callback receiving every notice, invoked on the subscription's task
pub type NoticeHandler = Arc<dyn Fn(SubscriptionNotice) + Send + Sync>;

/// One live subscription to the change feed of a scope
pub struct ChangeSubscription {
    transport: Arc<dyn ChangeTransport>,
    scope: ChangeScope,
    backoff: BackoffStrategy,
    state: Arc<watch::Sender<SubscriptionState>>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("scope", &self.scope)
            .field("state", &self.state())
            .finish()
    }
}

impl ChangeSubscription {
    pub fn new(
        transport: Arc<dyn ChangeTransport>,
        scope: ChangeScope,
        backoff: BackoffStrategy,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Idle);
        let (stop, _) = watch::channel(false);
        Self {
            transport,
            scope,
            backoff,
            state: Arc::new(state),
            stop,
            task: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> &ChangeScope {
        &self.scope
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Open the feed and deliver notices to `on_notice`
    ///
    /// Resolves once the first connection attempt has settled. Calling it on a
    /// running subscription does nothing; calling it after `stop()` fails with
    /// `SubscriptionStopped`.
    pub async fn start<F>(&self, on_notice: F) -> Result<(), SyncError>
    where
        F: Fn(SubscriptionNotice) + Send + Sync + 'static,
    {
        let mut claimed = false;
        let mut stopped = false;
        self.state.send_if_modified(|current| match current {
            SubscriptionState::Idle => {
                *current = SubscriptionState::Starting;
                claimed = true;
                true
            }
            SubscriptionState::Stopped => {
                stopped = true;
                false
            }
            _ => false,
        });

        if stopped {
            return Err(SyncError::SubscriptionStopped);
        }
        if !claimed {
            tracing::debug!(
                "[Subscription] Already running for table {}, ignoring start",
                self.scope.table
            );
            return Ok(());
        }

        tracing::info!("[Subscription] Starting change feed for table {}", self.scope.table);

        let mut state_rx = self.state.subscribe();
        let task = FeedTask {
            transport: Arc::clone(&self.transport),
            scope: self.scope.clone(),
            backoff: Backoff::new(self.backoff.clone()),
            state: Arc::clone(&self.state),
            stop: self.stop.subscribe(),
            on_notice: Arc::new(on_notice),
        };
        *self.task_slot() = Some(tokio::spawn(task.run()));

        let _ = state_rx
            .wait_for(|state| *state != SubscriptionState::Starting)
            .await;
        Ok(())
    }

    /// Tear the feed down and wait until no more notices can be delivered
    pub async fn stop(&self) {
        self.stop.send_replace(true);

        let handle = self.task_slot().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!("[Subscription] Feed task panicked: {}", e);
                }
            }
        }

        let changed = self.state.send_if_modified(|current| {
            if *current == SubscriptionState::Stopped {
                false
            } else {
                *current = SubscriptionState::Stopped;
                true
            }
        });
        if changed {
            tracing::info!("[Subscription] Stopped change feed for table {}", self.scope.table);
        }
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.stop.send_replace(true);
        let slot = match self.task.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

enum FeedEnd {
    Stopped,
    Dropped(SyncError),
}

/// Background loop owning the feed
struct FeedTask {
    transport: Arc<dyn ChangeTransport>,
    scope: ChangeScope,
    backoff: Backoff,
    state: Arc<watch::Sender<SubscriptionState>>,
    stop: watch::Receiver<bool>,
    on_notice: NoticeHandler,
}

impl FeedTask {
    async fn run(mut self) {
        let mut reconnecting = false;

        loop {
            if *self.stop.borrow() {
                break;
            }

            let subscribed = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => break,
                result = self.transport.subscribe(&self.scope) => result,
            };

            // stop() may have landed while setup was completing
            if *self.stop.borrow() {
                break;
            }

            match subscribed {
                Ok(feed) => {
                    if !advance(&self.state, SubscriptionState::Active) {
                        break;
                    }
                    tracing::info!(
                        "[Subscription] Change feed active for table {}",
                        self.scope.table
                    );
                    self.backoff.reset();
                    if reconnecting {
                        (self.on_notice)(SubscriptionNotice::Resynchronize);
                    }

                    match self.consume(feed).await {
                        FeedEnd::Stopped => break,
                        FeedEnd::Dropped(err) => {
                            tracing::warn!(
                                "[Subscription] Change feed for table {} dropped: {}",
                                self.scope.table,
                                err
                            );
                            if !advance(&self.state, SubscriptionState::Disconnected) {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "[Subscription] Failed to open change feed for table {}: {}",
                        self.scope.table,
                        err
                    );
                }
            }

            if !advance(&self.state, SubscriptionState::Reconnecting) {
                break;
            }
            reconnecting = true;

            let delay = self.backoff.next_delay();
            tracing::debug!(
                "[Subscription] Reconnecting in {:?} (attempt {})",
                delay,
                self.backoff.attempt()
            );
            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_if_modified(|current| {
            if *current == SubscriptionState::Stopped {
                false
            } else {
                *current = SubscriptionState::Stopped;
                true
            }
        });
    }

    async fn consume(&mut self, mut feed: ChangeFeed) -> FeedEnd {
        loop {
            let item = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => return FeedEnd::Stopped,
                item = feed.next() => item,
            };

            match item {
                Some(Ok(raw)) => self.deliver(raw),
                Some(Err(err)) => return FeedEnd::Dropped(err),
                None => return FeedEnd::Dropped(SyncError::transport("change feed closed by upstream")),
            }
        }
    }

    fn deliver(&self, raw: RawChangePayload) {
        match ChangeEvent::classify(raw) {
            Ok(event) => {
                tracing::debug!("[Subscription] Received {} event for {}", event.kind(), event.id());
                (self.on_notice)(SubscriptionNotice::Event(event));
            }
            Err(err) => {
                tracing::warn!("[Subscription] Dropping unclassifiable payload: {}", err);
                (self.on_notice)(SubscriptionNotice::Rejected(err));
            }
        }
    }
}

/// Move to `next` unless the subscription is already stopped
fn advance(state: &watch::Sender<SubscriptionState>, next: SubscriptionState) -> bool {
    let mut allowed = true;
    state.send_if_modified(|current| {
        if *current == SubscriptionState::Stopped {
            allowed = false;
            return false;
        }
        if *current == next {
            return false;
        }
        tracing::debug!("[Subscription] {} -> {}", current, next);
        *current = next;
        true
    });
    allowed
}

/// Resolves once a stop was requested or the owner went away
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
