//! Vanish-after-seen lifecycle.
//!
//! A message is `Active` until [`VanishController::mark_seen`] flips its `seen`
//! flag. Vanish messages get a `delete_at` deadline persisted in the same
//! statement and are handed to the [`VanishScheduler`], a single task that keeps
//! every pending deadline in a min-heap. When a deadline passes the message is
//! deleted and a `deleteMessage` event goes to whichever parties are online.
//!
//! Deadlines live in the database, so [`VanishController::recover_pending`]
//! re-arms them after a restart.

use crate::libs::core::models::{now_millis, MessageId, Timestamp};
use crate::libs::presence::{ChatEvent, NotificationChannel};
use crate::libs::storage::database::storage_sqlite::SqliteStore;
use crate::libs::storage::records::PendingDeletion;
use crate::libs::storage::storage_traits::{MessageStore, SeenUpdate};
use crate::ChatError;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

enum Command {
    Schedule(PendingDeletion),
    PendingCount(oneshot::Sender<usize>),
    Shutdown,
}

/// Owns the deadline queue. Dropping the last handle stops the task.
pub struct VanishScheduler {
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VanishScheduler {
    /// Starts the scheduler task. Must be called from within a tokio runtime.
    pub fn spawn(store: SqliteStore, channel: Arc<dyn NotificationChannel>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_scheduler(receiver, store, channel));
        Self {
            commands,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queues a deletion. An id that is already queued is ignored.
    pub fn schedule(&self, pending: PendingDeletion) {
        let message_id = pending.message_id.clone();
        if self.commands.send(Command::Schedule(pending)).is_err() {
            // The deadline is persisted, so recovery on the next start picks it up.
            warn!(%message_id, "Vanish scheduler stopped, deletion deferred to next start");
        }
    }

    /// Number of deadlines waiting to fire.
    pub async fn pending_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::PendingCount(reply)).is_err() {
            return 0;
        }
        response.await.unwrap_or(0)
    }

    /// Stops the task. Deletions already started run to completion.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!("Vanish scheduler task failed: {}", err);
            }
        }
    }
}

// Roughly 30 years, the same horizon tokio uses for a timer that never fires.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn instant_for(deadline: Timestamp) -> Instant {
    let remaining = deadline.saturating_sub(now_millis()).max(0) as u64;
    let now = Instant::now();
    now.checked_add(Duration::from_millis(remaining))
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Deletion deadline for a message seen at `seen_at`. Saturates instead of wrapping.
fn deadline_after(seen_at: Timestamp, delay: Duration) -> Timestamp {
    let delay_millis = Timestamp::try_from(delay.as_millis()).unwrap_or(Timestamp::MAX);
    seen_at.saturating_add(delay_millis)
}

async fn run_scheduler(
    mut commands: mpsc::UnboundedReceiver<Command>,
    store: SqliteStore,
    channel: Arc<dyn NotificationChannel>,
) {
    let mut queue: BinaryHeap<Reverse<(Timestamp, MessageId)>> = BinaryHeap::new();
    let mut scheduled: HashSet<MessageId> = HashSet::new();

    loop {
        let next_deadline = queue.peek().map(|Reverse((at, _))| instant_for(*at));

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Schedule(pending)) => {
                    if scheduled.insert(pending.message_id.clone()) {
                        debug!(message_id = %pending.message_id, delete_at = pending.delete_at, "Deletion scheduled");
                        queue.push(Reverse((pending.delete_at, pending.message_id)));
                    } else {
                        debug!(message_id = %pending.message_id, "Deletion already scheduled");
                    }
                }
                Some(Command::PendingCount(reply)) => {
                    let _ = reply.send(queue.len());
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                let now = now_millis();
                while queue.peek().is_some_and(|Reverse((at, _))| *at <= now) {
                    if let Some(Reverse((_, message_id))) = queue.pop() {
                        scheduled.remove(&message_id);
                        tokio::spawn(vanish(store.clone(), channel.clone(), message_id));
                    }
                }
            }
        }
    }

    if !queue.is_empty() {
        info!(pending = queue.len(), "Vanish scheduler stopped with pending deletions");
    }
}

/// Deletes one message and tells both parties. A missing row means someone got there first.
async fn vanish(store: SqliteStore, channel: Arc<dyn NotificationChannel>, message_id: MessageId) {
    let id = message_id.clone();
    let deleted = store
        .run_blocking(move |tx| tx.delete_message(&id))
        .await;

    match deleted {
        Ok(Some(message)) => {
            info!(%message_id, "Vanish message deleted");
            for user_id in message.participants() {
                channel.notify(
                    user_id,
                    ChatEvent::DeleteMessage {
                        message_id: message_id.clone(),
                    },
                );
            }
        }
        Ok(None) => debug!(%message_id, "Vanish message already gone"),
        Err(err) => error!(%message_id, "Failed to delete vanish message: {}", err),
    }
}

pub struct VanishController {
    store: SqliteStore,
    scheduler: VanishScheduler,
    delay: Duration,
}

impl VanishController {
    pub fn new(store: SqliteStore, channel: Arc<dyn NotificationChannel>, delay: Duration) -> Self {
        let scheduler = VanishScheduler::spawn(store.clone(), channel);
        Self {
            store,
            scheduler,
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Marks a message seen. Idempotent; vanish messages are queued for deletion once.
    #[instrument(skip_all, fields(message_id = %message_id))]
    pub async fn mark_seen(&self, message_id: &MessageId) -> Result<(), ChatError> {
        let deadline = deadline_after(now_millis(), self.delay);
        let id = message_id.clone();
        let update = self
            .store
            .run_blocking(move |tx| tx.mark_seen(&id, deadline))
            .await?;

        match update {
            SeenUpdate::Transitioned {
                vanish_deadline: Some(delete_at),
            } => {
                info!(delete_at, "Message seen, deletion scheduled");
                self.scheduler.schedule(PendingDeletion {
                    message_id: message_id.clone(),
                    delete_at,
                });
            }
            SeenUpdate::Transitioned {
                vanish_deadline: None,
            } => debug!("Message seen"),
            SeenUpdate::AlreadySeen => debug!("Message already seen"),
            SeenUpdate::NotFound => {
                return Err(ChatError::NotFound(format!("message {}", message_id)))
            }
        }
        Ok(())
    }

    /// Re-arms every persisted deadline. Overdue ones fire right away.
    pub async fn recover_pending(&self) -> Result<usize, ChatError> {
        let pending = self
            .store
            .run_blocking(|tx| tx.load_pending_deletions())
            .await?;

        let count = pending.len();
        for deletion in pending {
            self.scheduler.schedule(deletion);
        }
        if count > 0 {
            info!(count, "Recovered pending vanish deletions");
        }
        Ok(count)
    }

    pub async fn pending_count(&self) -> usize {
        self.scheduler.pending_count().await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
