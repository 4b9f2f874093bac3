use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::SubscriberId;
use crate::monitor::{Pacing, run_subscriber_loop};
use crate::signal::SignalEvaluator;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Handle to one subscriber's loop. The token and the task are only ever
/// stored, replaced and removed together.
struct ActiveTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveTask {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owns the subscriber → loop mapping and guarantees at most one live loop
/// per subscriber.
///
/// A subscriber is Running while its stored task has not finished, and Idle
/// otherwise (no entry, or an entry whose loop already returned). Every
/// lookup and mutation happens under one lock.
pub struct TaskRegistry {
    evaluator: Arc<SignalEvaluator>,
    pacing: Pacing,
    shutdown: CancellationToken,
    tasks: Mutex<HashMap<SubscriberId, ActiveTask>>,
}

impl TaskRegistry {
    /// Loops are cancelled together with `shutdown`.
    pub fn new(
        evaluator: Arc<SignalEvaluator>,
        pacing: Pacing,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            evaluator,
            pacing,
            shutdown,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, ActiveTask>> {
        // The map holds no invariant a panicking holder could half-update.
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a loop for `subscriber` unless one is already live.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, subscriber: SubscriberId) -> StartOutcome {
        let mut tasks = self.lock();

        if tasks.get(&subscriber).is_some_and(ActiveTask::is_live) {
            debug!(subscriber = %subscriber, "start ignored, already running");
            return StartOutcome::AlreadyRunning;
        }

        let cancel = self.shutdown.child_token();
        let evaluator = Arc::clone(&self.evaluator);
        let pacing = self.pacing;
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            run_subscriber_loop(subscriber, evaluator, pacing, loop_cancel).await;
            info!(subscriber = %subscriber, "subscriber loop ended");
        });

        // A finished loop (cancelled through shutdown, or panicked) is simply replaced.
        tasks.insert(subscriber, ActiveTask { cancel, handle });
        info!(subscriber = %subscriber, "analysis started");
        StartOutcome::Started
    }

    /// Cancel and forget the loop for `subscriber`. Safe to call when idle.
    pub fn stop(&self, subscriber: SubscriberId) -> StopOutcome {
        let Some(active) = self.lock().remove(&subscriber) else {
            debug!(subscriber = %subscriber, "stop ignored, not running");
            return StopOutcome::NotRunning;
        };

        let was_live = active.is_live();
        active.cancel.cancel();

        if was_live {
            info!(subscriber = %subscriber, "analysis stopped");
            StopOutcome::Stopped
        } else {
            debug!(subscriber = %subscriber, "cleared finished loop");
            StopOutcome::NotRunning
        }
    }

    pub fn is_running(&self, subscriber: SubscriberId) -> bool {
        self.lock().get(&subscriber).is_some_and(ActiveTask::is_live)
    }

    pub fn running_count(&self) -> usize {
        self.lock().values().filter(|t| t.is_live()).count()
    }

    /// Cancel every loop and wait briefly for each to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<(SubscriberId, ActiveTask)> = self.lock().drain().collect();

        for (subscriber, active) in tasks {
            active.cancel.cancel();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, active.handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, subscriber = %subscriber, "subscriber loop panicked")
                }
                Err(_) => warn!(subscriber = %subscriber, "subscriber loop did not stop in time"),
            }
        }
        info!("all subscriber loops stopped");
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use super::*;
    use crate::model::TimeFrame;
    use crate::monitor::NO_SYMBOLS_MESSAGE;
    use crate::signal::EvaluatorSettings;
    use crate::testing::{FakeMarket, RecordingNotifier};

    const ALICE: SubscriberId = SubscriberId(100);
    const BOB: SubscriberId = SubscriberId(200);

    fn registry(market: FakeMarket) -> (Arc<TaskRegistry>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = EvaluatorSettings {
            lookback: 5,
            timeframe: TimeFrame::Min1,
            threshold: 0.10,
        };
        let evaluator = Arc::new(SignalEvaluator::new(
            Arc::new(market),
            notifier.clone(),
            settings,
        ));
        let pacing = Pacing {
            symbol_delay: Duration::from_millis(500),
            cycle_delay: Duration::from_secs(60),
        };
        let registry = TaskRegistry::new(evaluator, pacing, CancellationToken::new());
        (Arc::new(registry), notifier)
    }

    fn pumping_market() -> FakeMarket {
        FakeMarket::default()
            .with_symbol("AAAUSDT", &[1.0, 1.0], 2.0)
            .with_symbol("BBBUSDT", &[1.0, 1.0], 0.5)
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_reports_already_running() {
        let (registry, _) = registry(pumping_market());

        assert_eq!(registry.start(ALICE), StartOutcome::Started);
        assert_eq!(registry.start(ALICE), StartOutcome::AlreadyRunning);
        assert!(registry.is_running(ALICE));
        assert_eq!(registry.running_count(), 1);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_idle_is_a_no_op() {
        let (registry, _) = registry(pumping_market());

        assert_eq!(registry.stop(ALICE), StopOutcome::NotRunning);
        assert_eq!(registry.stop(ALICE), StopOutcome::NotRunning);
        assert!(!registry.is_running(ALICE));
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_can_cycle_between_idle_and_running() {
        let (registry, _) = registry(pumping_market());

        for _ in 0..3 {
            assert_eq!(registry.start(ALICE), StartOutcome::Started);
            assert!(registry.is_running(ALICE));
            sleep(Duration::from_secs(1)).await;
            assert_eq!(registry.stop(ALICE), StopOutcome::Stopped);
            assert!(!registry.is_running(ALICE));
        }
        assert_eq!(registry.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_alerts_after_stop() {
        let (registry, notifier) = registry(pumping_market());

        registry.start(ALICE);
        sleep(Duration::from_millis(700)).await;
        assert_eq!(notifier.messages_for(ALICE).len(), 2);

        assert_eq!(registry.stop(ALICE), StopOutcome::Stopped);
        sleep(Duration::from_secs(600)).await;
        assert_eq!(notifier.messages_for(ALICE).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_run_independently() {
        let (registry, notifier) = registry(pumping_market());

        assert_eq!(registry.start(ALICE), StartOutcome::Started);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(registry.start(BOB), StartOutcome::Started);
        assert_eq!(registry.running_count(), 2);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(notifier.messages_for(ALICE).len(), 2);
        assert_eq!(notifier.messages_for(BOB).len(), 2);

        // Stopping one leaves the other untouched.
        registry.stop(ALICE);
        sleep(Duration::from_secs(61)).await;
        assert_eq!(notifier.messages_for(ALICE).len(), 2);
        assert_eq!(notifier.messages_for(BOB).len(), 4);
        assert!(registry.is_running(BOB));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_spawn_one_loop() {
        let (registry, _) = registry(pumping_market());

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.start(ALICE) })
            })
            .collect();

        let mut started = 0;
        for attempt in attempts {
            if attempt.await.unwrap() == StartOutcome::Started {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(registry.running_count(), 1);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_listing_keeps_subscriber_running() {
        let (registry, notifier) = registry(FakeMarket::default());

        assert_eq!(registry.start(ALICE), StartOutcome::Started);
        sleep(Duration::from_secs(200)).await;

        assert!(registry.is_running(ALICE));
        assert_eq!(notifier.messages_for(ALICE), vec![NO_SYMBOLS_MESSAGE]);
        assert_eq!(registry.start(ALICE), StartOutcome::AlreadyRunning);
        assert_eq!(registry.stop(ALICE), StopOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ended_by_process_shutdown_counts_as_idle() {
        let shutdown = CancellationToken::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let evaluator = Arc::new(SignalEvaluator::new(
            Arc::new(pumping_market()),
            notifier,
            EvaluatorSettings {
                lookback: 5,
                timeframe: TimeFrame::Min1,
                threshold: 0.10,
            },
        ));
        let pacing = Pacing {
            symbol_delay: Duration::from_millis(500),
            cycle_delay: Duration::from_secs(60),
        };
        let registry = TaskRegistry::new(evaluator, pacing, shutdown.clone());

        registry.start(ALICE);
        shutdown.cancel();
        sleep(Duration::from_millis(10)).await;

        assert!(!registry.is_running(ALICE));
        assert_eq!(registry.running_count(), 0);
        assert_eq!(registry.stop(ALICE), StopOutcome::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_loop() {
        let (registry, notifier) = registry(pumping_market());

        registry.start(ALICE);
        registry.start(BOB);
        sleep(Duration::from_millis(100)).await;
        registry.shutdown().await;

        let sent = notifier.messages().len();
        assert_eq!(registry.running_count(), 0);
        sleep(Duration::from_secs(600)).await;
        assert_eq!(notifier.messages().len(), sent);
    }
}
