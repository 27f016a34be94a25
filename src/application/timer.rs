use crate::domain::clock::{self, ClockSample};
use crate::domain::models::{DialogState, RoastMetadata, TimerRecord, TimerStatus};
use crate::infrastructure::audio::Notifier;
use crate::infrastructure::document_store::{
    Document, DocumentSubscription, RemoteDocumentStore, patch_from,
};
use crate::infrastructure::error::SyncError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const STATUS_CHANGE_BUFFER: usize = 32;

pub fn timer_key(user_id: &str) -> String {
    format!("roastTimer/{}", user_id.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// Emitted whenever the locally mirrored status changes, whoever caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub previous: TimerStatus,
    pub next: TimerStatus,
    pub origin: ChangeOrigin,
}

impl StatusChange {
    pub fn is_completion_edge(&self) -> bool {
        self.previous == TimerStatus::Running && self.next == TimerStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(TimerRecord),
    /// The call did not match the current state; expected under multi-client races.
    Ignored,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Local owner of the shared roast timer record. Every operation mutates the
/// local mirror first and then writes the whole record; invalid calls are
/// no-ops rather than errors.
pub struct TimerOrchestrator<S>
where
    S: RemoteDocumentStore,
{
    store: Arc<S>,
    key: String,
    device_id: String,
    notifier: Arc<Notifier>,
    now_provider: NowProvider,
    mirror: Mutex<TimerRecord>,
    status_changes: broadcast::Sender<StatusChange>,
}

impl<S> TimerOrchestrator<S>
where
    S: RemoteDocumentStore,
{
    pub fn new(store: Arc<S>, user_id: &str, device_id: impl Into<String>) -> Self {
        Self {
            store,
            key: timer_key(user_id),
            device_id: device_id.into(),
            notifier: Arc::new(Notifier::silent()),
            now_provider: Arc::new(Utc::now),
            mirror: Mutex::new(TimerRecord::default()),
            status_changes: broadcast::channel(STATUS_CHANGE_BUFFER).0,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn record(&self) -> TimerRecord {
        self.lock_mirror().clone()
    }

    pub fn sample(&self) -> ClockSample {
        clock::sample(&self.lock_mirror(), self.now())
    }

    pub fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.status_changes.subscribe()
    }

    pub fn subscribe(&self) -> Result<DocumentSubscription, SyncError> {
        self.store.subscribe(&self.key)
    }

    /// Replaces the mirror with the stored record without emitting a status
    /// change, so a reload never looks like a transition.
    pub async fn load(&self) -> Result<TimerRecord, SyncError> {
        let record = match self.store.read(&self.key).await? {
            Some(document) => TimerRecord::from_document(&document),
            None => TimerRecord::default(),
        };
        *self.lock_mirror() = record.clone();
        log::info!(
            "timer loaded key={} status={} dialog={}",
            self.key,
            record.status.as_str(),
            record.dialog_state.as_str()
        );
        Ok(record)
    }

    /// Adopts a pushed document wholesale; the store is the source of truth.
    pub fn apply_remote(&self, document: &Document) -> Option<StatusChange> {
        let record = TimerRecord::from_document(document);
        let previous = std::mem::replace(&mut *self.lock_mirror(), record.clone());
        self.emit(previous.status, record.status, ChangeOrigin::Remote)
    }

    pub async fn start(&self, duration: f64, metadata: RoastMetadata) -> Result<Transition, SyncError> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(SyncError::InvalidInput(
                "duration must be greater than zero".to_string(),
            ));
        }
        let now = self.now();
        let transition = self
            .transition("start", |record| record.started(duration, metadata, &self.device_id, now))
            .await?;
        if transition.is_applied() {
            self.notifier.timer_started();
        }
        Ok(transition)
    }

    pub async fn pause(&self) -> Result<Transition, SyncError> {
        let now = self.now();
        self.transition("pause", |record| record.paused(&self.device_id, now))
            .await
    }

    pub async fn resume(&self) -> Result<Transition, SyncError> {
        let now = self.now();
        self.transition("resume", |record| record.resumed(&self.device_id, now))
            .await
    }

    /// Finishes a running or paused session immediately.
    pub async fn skip(&self) -> Result<Transition, SyncError> {
        let now = self.now();
        let transition = self
            .transition("skip", |record| record.completed(&self.device_id, now))
            .await?;
        if transition.is_applied() {
            self.notifier.time_up();
        }
        Ok(transition)
    }

    /// Local tick check. The store cannot schedule, so every client runs this;
    /// only the first to see `running` locally writes the completion.
    pub async fn complete_if_due(&self, now: DateTime<Utc>) -> Result<Transition, SyncError> {
        let transition = self
            .transition("complete", |record| {
                if record.status != TimerStatus::Running || !clock::sample(record, now).is_due() {
                    return None;
                }
                record.completed(&self.device_id, now)
            })
            .await?;
        if transition.is_applied() {
            self.notifier.time_up();
        }
        Ok(transition)
    }

    pub async fn reset(&self) -> Result<Transition, SyncError> {
        let now = self.now();
        self.notifier.silence();
        self.transition("reset", |_| Some(TimerRecord::reset_at(now)))
            .await
    }

    pub async fn set_dialog_state(&self, dialog_state: DialogState) -> Result<Transition, SyncError> {
        let now = self.now();
        self.transition("dialog", |record| {
            if record.dialog_state == dialog_state {
                return None;
            }
            record.with_dialog_state(dialog_state, now)
        })
        .await
    }

    async fn transition<F>(&self, action: &str, next: F) -> Result<Transition, SyncError>
    where
        F: FnOnce(&TimerRecord) -> Option<TimerRecord>,
    {
        let (previous, record) = {
            let mut mirror = self.lock_mirror();
            let Some(record) = next(&mirror) else {
                log::debug!(
                    "ignored timer {action} key={} status={}",
                    self.key,
                    mirror.status.as_str()
                );
                return Ok(Transition::Ignored);
            };
            let previous = std::mem::replace(&mut *mirror, record.clone());
            (previous, record)
        };

        self.emit(previous.status, record.status, ChangeOrigin::Local);
        log::info!(
            "timer {action} key={} device={} status={} dialog={}",
            self.key,
            self.device_id,
            record.status.as_str(),
            record.dialog_state.as_str()
        );

        let patch = patch_from(record.to_document()?)?;
        if let Err(error) = self.store.write(&self.key, patch).await {
            log::error!("failed to persist timer {action} key={}: {error}", self.key);
            return Err(error);
        }
        Ok(Transition::Applied(record))
    }

    fn emit(&self, previous: TimerStatus, next: TimerStatus, origin: ChangeOrigin) -> Option<StatusChange> {
        if previous == next {
            return None;
        }
        let change = StatusChange {
            previous,
            next,
            origin,
        };
        // No receivers is fine; nothing is listening for edges yet.
        let _ = self.status_changes.send(change.clone());
        Some(change)
    }

    fn lock_mirror(&self) -> MutexGuard<'_, TimerRecord> {
        match self.mirror.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
