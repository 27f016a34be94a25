use crate::application::timer::NowProvider;
use crate::domain::models::{EntryChanges, ScheduleEntry};
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::document_store::{
    Document, DocumentSubscription, Patch, RemoteDocumentStore,
};
use crate::infrastructure::error::SyncError;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

const SCHEDULE_FIELD: &str = "timeLabels";

/// Where a buffer commits: one list-valued field of one document, plus the
/// identity fields written alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct EditTarget {
    pub document_key: String,
    pub field: String,
    pub identity: Patch,
}

impl EditTarget {
    pub fn today_schedule(user_id: &str, date: &str) -> Self {
        let mut identity = Patch::new();
        identity.insert("id".to_string(), Value::String(format!("schedule-{date}")));
        identity.insert("date".to_string(), Value::String(date.to_string()));
        Self {
            document_key: format!("todaySchedule/{}/{date}", user_id.trim()),
            field: SCHEDULE_FIELD.to_string(),
            identity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditTiming {
    pub debounce: Duration,
    pub composition_settle: Duration,
}

impl EditTiming {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.edit_debounce_ms),
            composition_settle: Duration::from_millis(config.composition_settle_ms),
        }
    }
}

impl Default for EditTiming {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// How a pushed snapshot was reconciled with the local draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMerge {
    /// Same as the baseline; typically our own write coming back.
    Echo,
    /// No local edits were pending, so the draft now shows the remote value.
    Adopted,
    /// Local edits were pending; the baseline moved and the draft was kept.
    Rebased,
}

struct BufferState<T> {
    target: EditTarget,
    baseline: Vec<T>,
    draft: Vec<T>,
    composing: bool,
    pending: Option<JoinHandle<()>>,
    schedule_seq: u64,
    generation: u64,
    last_error: Option<String>,
    now_provider: NowProvider,
}

impl<T> BufferState<T> {
    fn cancel_pending(&mut self) {
        self.schedule_seq += 1;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    fn replace_all(&mut self, snapshot: Vec<T>)
    where
        T: Clone,
    {
        self.cancel_pending();
        self.generation += 1;
        self.baseline = snapshot.clone();
        self.draft = snapshot;
    }
}

struct BufferInner<S, T> {
    store: Arc<S>,
    timing: EditTiming,
    state: Mutex<BufferState<T>>,
    commit_gate: AsyncMutex<()>,
}

impl<S, T> BufferInner<S, T>
where
    S: RemoteDocumentStore + 'static,
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, BufferState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Writes the draft when it differs from the baseline. Scheduled commits
    /// stand down while a composition is open; flushes do not.
    ///
    /// Commits run one at a time: a flush issued while a debounced write is
    /// in flight waits for it, then diffs against the advanced baseline.
    async fn commit(&self, respect_composition: bool) -> Result<bool, SyncError> {
        let _gate = self.commit_gate.lock().await;
        let (key, patch, written, generation) = {
            let state = self.lock_state();
            if respect_composition && state.composing {
                return Ok(false);
            }
            if state.draft == state.baseline {
                return Ok(false);
            }
            let mut patch = state.target.identity.clone();
            patch.insert(state.target.field.clone(), serde_json::to_value(&state.draft)?);
            patch.insert(
                "lastUpdatedAt".to_string(),
                serde_json::to_value((state.now_provider)())?,
            );
            (
                state.target.document_key.clone(),
                patch,
                state.draft.clone(),
                state.generation,
            )
        };

        match self.store.write(&key, patch).await {
            Ok(()) => {
                let entries = written.len();
                let mut state = self.lock_state();
                if state.generation == generation {
                    state.baseline = written;
                }
                state.last_error = None;
                log::info!("committed edit buffer key={key} entries={entries}");
                Ok(true)
            }
            Err(error) => {
                log::error!("failed to commit edit buffer key={key}: {error}");
                self.lock_state().last_error = Some(error.to_string());
                Err(error)
            }
        }
    }
}

fn schedule_commit<S, T>(
    inner: &Arc<BufferInner<S, T>>,
    state: &mut BufferState<T>,
    delay: Duration,
) where
    S: RemoteDocumentStore + 'static,
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    state.cancel_pending();
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!(
            "no async runtime; edit commit for key={} waits for the next flush",
            state.target.document_key
        );
        return;
    };
    let seq = state.schedule_seq;
    let task_inner = Arc::clone(inner);
    state.pending = Some(runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        {
            let mut state = task_inner.lock_state();
            if state.schedule_seq != seq {
                return;
            }
            // Detach so a later keystroke cannot abort the write mid-flight.
            state.pending = None;
        }
        // Failures are kept in `last_error` for the caller.
        let _ = task_inner.commit(true).await;
    }));
}

/// Debounced local mirror of one remote list. Edits show up in the draft at
/// once and reach the store after a quiet period; a failed write never rolls
/// the draft back.
///
/// Scheduling requires a tokio runtime. Without one, edits stay local until
/// [`flush`](Self::flush) or [`close`](Self::close). Dropping the buffer with
/// pending edits flushes them on a detached task.
pub struct OptimisticEditBuffer<S, T>
where
    S: RemoteDocumentStore + 'static,
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    inner: Arc<BufferInner<S, T>>,
}

impl<S, T> OptimisticEditBuffer<S, T>
where
    S: RemoteDocumentStore + 'static,
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>, target: EditTarget, snapshot: Vec<T>, timing: EditTiming) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                store,
                timing,
                state: Mutex::new(BufferState {
                    target,
                    baseline: snapshot.clone(),
                    draft: snapshot,
                    composing: false,
                    pending: None,
                    schedule_seq: 0,
                    generation: 0,
                    last_error: None,
                    now_provider: Arc::new(Utc::now),
                }),
                commit_gate: AsyncMutex::new(()),
            }),
        }
    }

    pub fn with_now_provider(self, now_provider: NowProvider) -> Self {
        self.inner.lock_state().now_provider = now_provider;
        self
    }

    pub fn target(&self) -> EditTarget {
        self.inner.lock_state().target.clone()
    }

    pub fn draft(&self) -> Vec<T> {
        self.inner.lock_state().draft.clone()
    }

    pub fn baseline(&self) -> Vec<T> {
        self.inner.lock_state().baseline.clone()
    }

    pub fn has_pending_changes(&self) -> bool {
        let state = self.inner.lock_state();
        state.draft != state.baseline
    }

    pub fn is_composing(&self) -> bool {
        self.inner.lock_state().composing
    }

    /// Error from the most recent failed background commit, if any.
    pub fn take_last_error(&self) -> Option<String> {
        self.inner.lock_state().last_error.take()
    }

    pub fn subscribe(&self) -> Result<DocumentSubscription, SyncError> {
        let key = self.inner.lock_state().target.document_key.clone();
        self.inner.store.subscribe(&key)
    }

    /// Replaces both draft and baseline; a pending commit is dropped since
    /// there is nothing left to diff.
    pub fn load(&self, snapshot: Vec<T>) {
        self.inner.lock_state().replace_all(snapshot);
    }

    pub fn mutate<F>(&self, updater: F)
    where
        F: FnOnce(Vec<T>) -> Vec<T>,
    {
        let mut state = self.inner.lock_state();
        let current = std::mem::take(&mut state.draft);
        state.draft = updater(current);
        if state.composing {
            return;
        }
        if state.draft == state.baseline {
            state.cancel_pending();
            return;
        }
        schedule_commit(&self.inner, &mut state, self.inner.timing.debounce);
    }

    pub fn composition_start(&self) {
        let mut state = self.inner.lock_state();
        state.composing = true;
        state.cancel_pending();
    }

    pub fn composition_end(&self) {
        let mut state = self.inner.lock_state();
        state.composing = false;
        if state.draft != state.baseline {
            schedule_commit(&self.inner, &mut state, self.inner.timing.composition_settle);
        }
    }

    /// Reconciles a pushed snapshot for the current key. Diffing is against
    /// the baseline, never the draft, so our own echo is not a conflict.
    pub fn apply_remote(&self, snapshot: Vec<T>) -> RemoteMerge {
        let mut state = self.inner.lock_state();
        if snapshot == state.baseline {
            return RemoteMerge::Echo;
        }
        if state.draft == state.baseline {
            state.replace_all(snapshot);
            return RemoteMerge::Adopted;
        }
        log::warn!(
            "remote update during local edits key={}; keeping local draft",
            state.target.document_key
        );
        state.baseline = snapshot;
        RemoteMerge::Rebased
    }

    /// Skips the debounce and commits now. Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool, SyncError> {
        self.inner.lock_state().cancel_pending();
        self.inner.commit(false).await
    }

    /// Flushes the current key, then points the buffer at `target`. The
    /// switch happens even when the flush fails; the error is returned.
    pub async fn switch_target(&self, target: EditTarget, snapshot: Vec<T>) -> Result<bool, SyncError> {
        let flushed = self.flush().await;
        {
            let mut state = self.inner.lock_state();
            log::info!(
                "edit buffer switching key={} -> {}",
                state.target.document_key,
                target.document_key
            );
            state.target = target;
            state.composing = false;
            state.replace_all(snapshot);
        }
        flushed
    }

    /// Final flush on teardown; exactly one write when edits are pending.
    pub async fn close(self) -> Result<bool, SyncError> {
        self.flush().await
    }
}

impl<S, T> OptimisticEditBuffer<S, T>
where
    S: RemoteDocumentStore + 'static,
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Reads the current key from the store and loads it.
    pub async fn refresh(&self) -> Result<Vec<T>, SyncError> {
        let (key, field) = {
            let state = self.inner.lock_state();
            (state.target.document_key.clone(), state.target.field.clone())
        };
        let document = self.inner.store.read(&key).await?;
        let snapshot = decode_list(document.as_ref(), &field);
        self.load(snapshot.clone());
        Ok(snapshot)
    }

    pub fn apply_remote_document(&self, document: &Document) -> RemoteMerge {
        let field = self.inner.lock_state().target.field.clone();
        self.apply_remote(decode_list(Some(document), &field))
    }
}

impl<S> OptimisticEditBuffer<S, ScheduleEntry>
where
    S: RemoteDocumentStore + 'static,
{
    /// Appends an empty entry at `HH:MM`.
    pub fn add_entry(&self, hour_input: &str, minute_input: &str) -> Result<ScheduleEntry, SyncError> {
        let order = u32::try_from(self.inner.lock_state().draft.len()).unwrap_or(u32::MAX);
        let entry = ScheduleEntry::at(hour_input, minute_input, order).map_err(SyncError::InvalidInput)?;
        let added = entry.clone();
        self.mutate(move |mut entries| {
            entries.push(added);
            entries
        });
        Ok(entry)
    }

    /// Applies a partial edit to one entry. Returns `Ok(false)` when the id
    /// is not in the draft; an invalid time leaves the draft untouched.
    pub fn update_entry(&self, entry_id: &str, changes: &EntryChanges) -> Result<bool, SyncError> {
        let Some(current) = self
            .inner
            .lock_state()
            .draft
            .iter()
            .find(|entry| entry.id == entry_id)
            .cloned()
        else {
            return Ok(false);
        };
        let updated = current.apply(changes).map_err(SyncError::InvalidInput)?;
        self.mutate(move |entries| {
            entries
                .into_iter()
                .map(|entry| if entry.id == updated.id { updated.clone() } else { entry })
                .collect()
        });
        Ok(true)
    }

    pub fn update_content(&self, entry_id: &str, content: &str) -> bool {
        let changes = EntryChanges {
            content: Some(content.to_string()),
            ..EntryChanges::default()
        };
        matches!(self.update_entry(entry_id, &changes), Ok(true))
    }

    pub fn remove_entry(&self, entry_id: &str) -> bool {
        if !self.inner.lock_state().draft.iter().any(|entry| entry.id == entry_id) {
            return false;
        }
        self.mutate(|entries| entries.into_iter().filter(|entry| entry.id != entry_id).collect());
        true
    }
}

impl<S, T> Drop for OptimisticEditBuffer<S, T>
where
    S: RemoteDocumentStore + 'static,
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        state.cancel_pending();
        if state.draft == state.baseline {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "edit buffer dropped outside a runtime; unflushed edits lost key={}",
                state.target.document_key
            );
            return;
        };
        log::info!(
            "edit buffer dropped with pending edits; flushing key={}",
            state.target.document_key
        );
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            let _ = inner.commit(false).await;
        });
    }
}

/// Missing field means an empty list; undecodable items are dropped.
fn decode_list<T>(document: Option<&Document>, field: &str) -> Vec<T>
where
    T: DeserializeOwned,
{
    let Some(items) = document
        .and_then(|document| document.get(field))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            serde_json::from_value::<T>(item.clone())
                .map_err(|error| log::warn!("dropping malformed {field} item: {error}"))
                .ok()
        })
        .collect()
}
