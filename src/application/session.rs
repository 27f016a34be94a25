use crate::application::dialog_flow::DialogFlowStateMachine;
use crate::application::timer::TimerOrchestrator;
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::document_store::{DocumentSubscription, RemoteDocumentStore};
use crate::infrastructure::error::SyncError;
use crate::infrastructure::navigation::NavigationPort;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Wires one client's timer and dialog flow to the store: remote pushes and
/// the local completion tick both end in a dialog pump.
pub struct RoastTimerSession<S>
where
    S: RemoteDocumentStore + 'static,
{
    timer: Arc<TimerOrchestrator<S>>,
    dialog: Arc<DialogFlowStateMachine<S>>,
    tick_interval: Duration,
}

pub struct SessionHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for it; no tick or push is handled afterwards.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(error) = self.task.await {
            if !error.is_cancelled() {
                log::error!("roast timer session task failed: {error}");
            }
        }
    }
}

impl<S> RoastTimerSession<S>
where
    S: RemoteDocumentStore + 'static,
{
    pub fn new(
        timer: Arc<TimerOrchestrator<S>>,
        navigation: Arc<dyn NavigationPort>,
        config: &SyncConfig,
    ) -> Self {
        let dialog = Arc::new(DialogFlowStateMachine::new(Arc::clone(&timer), navigation));
        Self {
            timer,
            dialog,
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
        }
    }

    pub fn timer(&self) -> &Arc<TimerOrchestrator<S>> {
        &self.timer
    }

    pub fn dialog(&self) -> &Arc<DialogFlowStateMachine<S>> {
        &self.dialog
    }

    /// Subscribes before loading so no push between the two is lost, then
    /// starts the background loop.
    pub async fn open(&self) -> Result<SessionHandle, SyncError> {
        let subscription = self.timer.subscribe()?;
        self.timer.load().await?;
        self.dialog.pump();

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            Arc::clone(&self.timer),
            Arc::clone(&self.dialog),
            subscription,
            stop_rx,
            self.tick_interval,
        ));
        log::info!(
            "roast timer session opened key={} tick_ms={}",
            self.timer.key(),
            self.tick_interval.as_millis()
        );
        Ok(SessionHandle { stop_tx, task })
    }
}

async fn run_session<S>(
    timer: Arc<TimerOrchestrator<S>>,
    dialog: Arc<DialogFlowStateMachine<S>>,
    mut subscription: DocumentSubscription,
    mut stop_rx: watch::Receiver<bool>,
    tick_interval: Duration,
) where
    S: RemoteDocumentStore + 'static,
{
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            pushed = subscription.next() => {
                let Some(mut document) = pushed else {
                    log::warn!("timer subscription closed key={}", timer.key());
                    break;
                };
                // Pushes carry whole documents; only the newest queued one matters.
                while let Some(newer) = subscription.try_next() {
                    document = newer;
                }
                timer.apply_remote(&document);
            }
            _ = ticker.tick() => {
                if let Err(error) = timer.complete_if_due(timer.now()).await {
                    log::warn!("completion tick failed key={}: {error}", timer.key());
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
        dialog.pump();
    }
    log::info!("roast timer session stopped key={}", timer.key());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::timer::testing::ManualClock;
    use crate::domain::models::{DialogState, RoastMetadata, TimerStatus};
    use crate::infrastructure::document_store::InMemoryDocumentStore;
    use crate::infrastructure::navigation::testing::RecordingNavigation;

    struct Client {
        session: RoastTimerSession<InMemoryDocumentStore>,
        navigation: Arc<RecordingNavigation>,
    }

    fn client(store: &Arc<InMemoryDocumentStore>, device: &str, clock: &ManualClock) -> Client {
        let timer = Arc::new(
            TimerOrchestrator::new(Arc::clone(store), "roaster-1", device)
                .with_now_provider(clock.provider()),
        );
        let navigation = Arc::new(RecordingNavigation::default());
        let session = RoastTimerSession::new(timer, navigation.clone(), &SyncConfig::default());
        Client {
            session,
            navigation,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1_100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_dialog_flow_after_completion() {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock = ManualClock::at("2026-10-18T09:00:00Z");
        let store = Arc::new(InMemoryDocumentStore::default());
        let client = client(&store, "tablet-a", &clock);
        let handle = client.session.open().await.expect("open session");
        let timer = client.session.timer();
        let dialog = client.session.dialog();

        timer
            .start(600.0, RoastMetadata::new("Yirgacheffe", 500, "light"))
            .await
            .expect("start");
        clock.advance_secs(600);
        settle().await;

        assert_eq!(timer.record().status, TimerStatus::Completed);
        assert_eq!(dialog.visible(), DialogState::Completion);

        dialog.acknowledge().await.expect("acknowledge");
        settle().await;
        assert_eq!(dialog.visible(), DialogState::ContinuousRoast);

        dialog.decline().await.expect("decline");
        settle().await;
        assert_eq!(dialog.visible(), DialogState::AfterPurge);

        dialog.proceed_to_record().await.expect("proceed");
        settle().await;

        let targets = client.navigation.targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].query_value("duration"), Some("600"));
        assert_eq!(targets[0].query_value("weight"), Some("500"));
        let record = timer.record();
        assert_eq!(record.status, TimerStatus::Idle);
        assert_eq!(record.dialog_state, DialogState::None);
        assert_eq!(dialog.visible(), DialogState::None);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_remote_timer_shows_same_remaining_time() {
        let clock = ManualClock::at("2026-10-18T09:00:00Z");
        let store = Arc::new(InMemoryDocumentStore::default());
        let tablet_a = client(&store, "tablet-a", &clock);
        let tablet_b = client(&store, "tablet-b", &clock);
        let handle_a = tablet_a.session.open().await.expect("open a");
        let handle_b = tablet_b.session.open().await.expect("open b");

        tablet_a
            .session
            .timer()
            .start(900.0, RoastMetadata::default())
            .await
            .expect("start");
        clock.advance_secs(321);
        tablet_a.session.timer().pause().await.expect("pause");
        settle().await;
        clock.advance_secs(60);

        let sample_a = tablet_a.session.timer().sample();
        let sample_b = tablet_b.session.timer().sample();
        assert_eq!(sample_b, sample_a);
        assert_eq!(sample_b.remaining, 579.0);

        handle_a.shutdown().await;
        handle_b.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn racing_clients_converge_on_completion() {
        let clock = ManualClock::at("2026-10-18T09:00:00Z");
        let store = Arc::new(InMemoryDocumentStore::default());
        let tablet_a = client(&store, "tablet-a", &clock);
        let tablet_b = client(&store, "tablet-b", &clock);
        let handle_a = tablet_a.session.open().await.expect("open a");
        let handle_b = tablet_b.session.open().await.expect("open b");

        tablet_a
            .session
            .timer()
            .start(60.0, RoastMetadata::default())
            .await
            .expect("start");
        settle().await;
        let writes_before = store.write_count();
        clock.advance_secs(60);
        settle().await;
        settle().await;

        assert!(store.write_count() - writes_before <= 2);
        assert_eq!(tablet_a.session.dialog().visible(), DialogState::Completion);
        assert_eq!(tablet_b.session.dialog().visible(), DialogState::Completion);

        handle_a.shutdown().await;
        handle_b.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_a_completed_timer_does_not_reopen_the_dialog() {
        let clock = ManualClock::at("2026-10-18T09:00:00Z");
        let store = Arc::new(InMemoryDocumentStore::default());
        let first = client(&store, "tablet-a", &clock);
        let handle = first.session.open().await.expect("open");
        first
            .session
            .timer()
            .start(60.0, RoastMetadata::default())
            .await
            .expect("start");
        clock.advance_secs(60);
        settle().await;
        first.session.dialog().close().await.expect("close");
        settle().await;
        handle.shutdown().await;

        let reloaded = client(&store, "tablet-a", &clock);
        let handle = reloaded.session.open().await.expect("reopen");
        settle().await;
        assert_eq!(reloaded.session.timer().record().status, TimerStatus::Completed);
        assert_eq!(reloaded.session.dialog().visible(), DialogState::None);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let clock = ManualClock::at("2026-10-18T09:00:00Z");
        let store = Arc::new(InMemoryDocumentStore::default());
        let client = client(&store, "tablet-a", &clock);
        let handle = client.session.open().await.expect("open");
        client
            .session
            .timer()
            .start(30.0, RoastMetadata::default())
            .await
            .expect("start");
        settle().await;
        assert!(!handle.is_finished());

        handle.shutdown().await;
        clock.advance_secs(31);
        settle().await;
        assert_eq!(client.session.timer().record().status, TimerStatus::Running);
    }
}
