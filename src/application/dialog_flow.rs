use crate::application::timer::{StatusChange, TimerOrchestrator, Transition};
use crate::domain::models::{DialogState, TimerRecord, TimerStatus};
use crate::infrastructure::document_store::RemoteDocumentStore;
use crate::infrastructure::error::SyncError;
use crate::infrastructure::navigation::{NavigationPort, NavigationTarget};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Moved(DialogState),
    Ignored,
}

struct FlowState {
    visible: DialogState,
    busy: bool,
    last_projected: Option<(TimerStatus, DialogState)>,
}

/// Drives the post-completion dialog sequence
/// (completion, continuous roast, after purge) shared across clients.
///
/// The visible dialog is a single value, so two dialogs can never be shown
/// at once. Remote dialog states are only ever adopted forward; multi-step
/// operations run under an exclusive section that freezes the projection.
pub struct DialogFlowStateMachine<S>
where
    S: RemoteDocumentStore,
{
    timer: Arc<TimerOrchestrator<S>>,
    navigation: Arc<dyn NavigationPort>,
    state: Mutex<FlowState>,
    status_changes: Mutex<broadcast::Receiver<StatusChange>>,
}

/// Held for the duration of a multi-step operation. Dropping it discards the
/// status edges queued meanwhile and releases the section.
pub struct ExclusiveSection<'a, S>
where
    S: RemoteDocumentStore,
{
    flow: &'a DialogFlowStateMachine<S>,
}

impl<S> Drop for ExclusiveSection<'_, S>
where
    S: RemoteDocumentStore,
{
    fn drop(&mut self) {
        let discarded = self.flow.drain_status_changes().len();
        let mut state = self.flow.lock_state();
        state.busy = false;
        state.last_projected = None;
        log::debug!("dialog exclusive section released discarded_edges={discarded}");
    }
}

impl<S> DialogFlowStateMachine<S>
where
    S: RemoteDocumentStore,
{
    /// Subscribes to the orchestrator's edges right away so none are missed
    /// between construction and the first [`pump`](Self::pump).
    pub fn new(timer: Arc<TimerOrchestrator<S>>, navigation: Arc<dyn NavigationPort>) -> Self {
        let status_changes = timer.subscribe_status_changes();
        Self {
            timer,
            navigation,
            state: Mutex::new(FlowState {
                visible: DialogState::None,
                busy: false,
                last_projected: None,
            }),
            status_changes: Mutex::new(status_changes),
        }
    }

    pub fn visible(&self) -> DialogState {
        self.lock_state().visible
    }

    pub fn is_busy(&self) -> bool {
        self.lock_state().busy
    }

    pub fn enter_exclusive(&self) -> Option<ExclusiveSection<'_, S>> {
        let mut state = self.lock_state();
        if state.busy {
            return None;
        }
        state.busy = true;
        Some(ExclusiveSection { flow: self })
    }

    /// Reconciles the visible dialog with the timer mirror: projects the
    /// current record, then opens the completion dialog for each observed
    /// running -> completed edge. Does nothing while an exclusive section runs.
    pub fn pump(&self) {
        if self.is_busy() {
            return;
        }
        let record = self.timer.record();
        self.project(&record);

        let edges = self.drain_status_changes();
        if record.status != TimerStatus::Completed {
            return;
        }
        for change in edges.iter().filter(|change| change.is_completion_edge()) {
            let mut state = self.lock_state();
            if state.busy || state.visible != DialogState::None {
                continue;
            }
            state.visible = DialogState::Completion;
            log::info!(
                "completion dialog opened origin={:?} key={}",
                change.origin,
                self.timer.key()
            );
        }
    }

    /// Projects the remote dialog state, forward only. A record that is not
    /// completed, or whose dialog is none, closes whatever is visible.
    pub fn project(&self, record: &TimerRecord) {
        let mut state = self.lock_state();
        if state.busy {
            return;
        }
        let observed = (record.status, record.dialog_state);
        if state.last_projected == Some(observed) {
            return;
        }
        state.last_projected = Some(observed);

        let target = if record.status == TimerStatus::Completed {
            record.dialog_state
        } else {
            DialogState::None
        };
        if target == DialogState::None {
            state.visible = DialogState::None;
        } else if target.rank() > state.visible.rank() {
            state.visible = target;
        } else if target != state.visible {
            log::debug!(
                "ignoring stale dialog push remote={} visible={}",
                target.as_str(),
                state.visible.as_str()
            );
        }
    }

    /// "OK" on the completion dialog.
    pub async fn acknowledge(&self) -> Result<Step, SyncError> {
        self.timer.notifier().silence();
        self.advance(DialogState::Completion, DialogState::ContinuousRoast)
            .await
    }

    /// Dismisses the visible dialog; the timer stays completed.
    pub async fn close(&self) -> Result<Step, SyncError> {
        let Some(current) = self.visible_unless_busy() else {
            return Ok(Step::Ignored);
        };
        if current == DialogState::None {
            return Ok(Step::Ignored);
        }
        self.timer.notifier().silence();
        self.advance(current, DialogState::None).await
    }

    /// "No" on the continuous-roast question.
    pub async fn decline(&self) -> Result<Step, SyncError> {
        self.advance(DialogState::ContinuousRoast, DialogState::AfterPurge)
            .await
    }

    /// "Yes" on the continuous-roast question: reset and go back to the timer.
    pub async fn continue_roasting(&self) -> Result<Step, SyncError> {
        if self.visible() != DialogState::ContinuousRoast {
            return Ok(Step::Ignored);
        }
        let Some(_section) = self.enter_exclusive() else {
            return Ok(Step::Ignored);
        };
        self.hide();
        self.timer.reset().await?;
        self.navigate(&NavigationTarget::RoastTimer);
        Ok(Step::Moved(DialogState::None))
    }

    /// Leaves the flow for record creation, pre-filled from the session
    /// snapshot taken before the reset.
    pub async fn proceed_to_record(&self) -> Result<Step, SyncError> {
        if self.visible() != DialogState::AfterPurge {
            return Ok(Step::Ignored);
        }
        let Some(_section) = self.enter_exclusive() else {
            return Ok(Step::Ignored);
        };
        self.timer.notifier().silence();
        self.hide();

        let snapshot = self.timer.record();
        let target = NavigationTarget::record_from(&snapshot, self.timer.now());
        self.navigate(&target);
        self.timer.reset().await?;
        Ok(Step::Moved(DialogState::None))
    }

    /// Closes the after-purge dialog without recording; the session is
    /// discarded.
    pub async fn close_after_purge(&self) -> Result<Step, SyncError> {
        if self.visible() != DialogState::AfterPurge {
            return Ok(Step::Ignored);
        }
        let Some(_section) = self.enter_exclusive() else {
            return Ok(Step::Ignored);
        };
        self.hide();
        self.timer.reset().await?;
        Ok(Step::Moved(DialogState::None))
    }

    async fn advance(&self, from: DialogState, to: DialogState) -> Result<Step, SyncError> {
        {
            let mut state = self.lock_state();
            if state.busy || state.visible != from {
                log::debug!(
                    "ignored dialog step from={} to={} visible={}",
                    from.as_str(),
                    to.as_str(),
                    state.visible.as_str()
                );
                return Ok(Step::Ignored);
            }
            state.visible = to;
        }
        if let Transition::Ignored = self.timer.set_dialog_state(to).await? {
            log::debug!("dialog {} already stored key={}", to.as_str(), self.timer.key());
        }
        Ok(Step::Moved(to))
    }

    fn visible_unless_busy(&self) -> Option<DialogState> {
        let state = self.lock_state();
        (!state.busy).then_some(state.visible)
    }

    fn hide(&self) {
        self.lock_state().visible = DialogState::None;
    }

    fn navigate(&self, target: &NavigationTarget) {
        let path = target.to_url_path();
        match self.navigation.navigate(target) {
            Ok(()) => log::info!("navigated to {path}"),
            Err(error) => log::warn!("navigation to {path} failed: {error}"),
        }
    }

    fn drain_status_changes(&self) -> Vec<StatusChange> {
        let mut receiver = match self.status_changes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut drained = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(change) => drained.push(change),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("dialog flow missed {skipped} status changes");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        drained
    }

    fn lock_state(&self) -> MutexGuard<'_, FlowState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
