//! Connection leak monitoring through the coordinator facade.

mod common;

use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilience_coordinator::config::{CoordinatorConfig, LeakConfig};
use resilience_coordinator::leaks::{
    ConnectionKind, ConnectionLeakMonitor, LeakProbe, LeakReason, ReleaseOutcome, Tracked,
};
use resilience_coordinator::store::{Alert, AlertLevel, LogNotifier, Notifier, NotifyError};
use resilience_coordinator::{ResilienceCoordinator, ResilienceRegistry, Shutdown};

/// Subscription whose buffer grows while nobody drains it.
#[derive(Default)]
struct Subscription {
    buffered: AtomicU64,
}

impl LeakProbe for Subscription {
    fn memory_bytes(&self) -> u64 {
        self.buffered.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

fn leak_config() -> LeakConfig {
    LeakConfig {
        sample_interval_secs: 30,
        sweep_interval_secs: 300,
        memory_threshold_bytes: 10_000,
        max_age_secs: 1_800,
        aggregate_alert_bytes: 50_000,
    }
}

fn monitor(notifier: Arc<dyn Notifier>) -> ConnectionLeakMonitor {
    ConnectionLeakMonitor::new(Arc::new(ResilienceRegistry::new()), leak_config(), notifier)
}

fn counting_release(calls: &Arc<AtomicU32>) -> impl FnOnce() -> Result<(), String> + Send + 'static {
    let calls = calls.clone();
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_growing_subscription_is_cleaned_up() {
    let m = monitor(Arc::new(LogNotifier));
    let calls = Arc::new(AtomicU32::new(0));
    let release = counting_release(&calls);

    let lease = m
        .register("rooms:42", ConnectionKind::Subscription, "chat", || async move {
            Ok::<_, Infallible>(Tracked::new(Subscription::default(), release))
        })
        .await
        .unwrap();

    lease.buffered.store(2_000, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(m.is_active("rooms:42"));

    lease.buffered.store(64_000, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(!m.is_active("rooms:42"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let reports = m.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].reason, LeakReason::MemoryThreshold);
    assert_eq!(reports[0].memory_bytes, 64_000);
    assert!(reports[0].cleanup_successful);

    // the caller's own release after cleanup finds nothing to do
    assert_eq!(m.release("rooms:42"), ReleaseOutcome::NotFound);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_release_and_cleanup_race_calls_release_once() {
    for round in 0..50 {
        let m = monitor(Arc::new(LogNotifier));
        let calls = Arc::new(AtomicU32::new(0));
        let release = counting_release(&calls);
        let id = format!("ws-{round}");

        let lease = m
            .register(id.clone(), ConnectionKind::Socket, "presence", || async move {
                Ok::<_, Infallible>(Tracked::new(Subscription::default(), release))
            })
            .await
            .unwrap();
        lease.buffered.store(20_000, Ordering::SeqCst);

        let manual = {
            let m = m.clone();
            let id = id.clone();
            tokio::spawn(async move { m.release(&id) })
        };
        let sampled = {
            let m = m.clone();
            let id = id.clone();
            tokio::spawn(async move { m.check_connection(&id) })
        };
        let outcome = manual.await.unwrap();
        let report = sampled.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "round {round}");
        assert!(!m.is_active(&id));
        match outcome {
            ReleaseOutcome::Released => assert!(report.is_none()),
            ReleaseOutcome::AlreadyReleased | ReleaseOutcome::NotFound => {
                assert!(report.is_some_and(|r| r.cleanup_successful))
            }
            ReleaseOutcome::ReleaseFailed(e) => panic!("unexpected release failure: {e}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_cleanup_raises_critical_alert() {
    let notifier = Arc::new(RecordingNotifier::default());
    let m = monitor(notifier.clone());

    m.register("poll-1", ConnectionKind::Interval, "inventory", || async {
        let sub = Subscription::default();
        sub.buffered.store(99_000, Ordering::SeqCst);
        Ok::<_, Infallible>(Tracked::new(sub, || Err("timer already dropped".to_string())))
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;

    let leaks = m.active_leaks();
    assert_eq!(leaks.len(), 1);
    assert!(leaks[0].cleanup_attempted);
    assert!(!leaks[0].cleanup_successful);

    let alerts = notifier.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Critical);
    assert_eq!(alerts[0].component, "leak-monitor");
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_on_shutdown() {
    let notifier = Arc::new(RecordingNotifier::default());
    let m = monitor(notifier.clone());
    for i in 0..6 {
        m.register(format!("sub-{i}"), ConnectionKind::Listener, "feed", || async {
            let sub = Subscription::default();
            sub.buffered.store(9_000, Ordering::SeqCst);
            Ok::<_, Infallible>(Tracked::new(sub, || Ok(())))
        })
        .await
        .unwrap();
    }

    let shutdown = Shutdown::new();
    let sweeper = tokio::spawn(m.clone().run_sweeper(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_secs(301)).await;
    {
        let alerts = notifier.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }
    // individually below the threshold, so the sweep leaves them alone
    assert_eq!(m.active_connections().len(), 6);

    shutdown.trigger();
    sweeper.await.unwrap();
}

#[tokio::test]
async fn test_coordinator_status_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config: CoordinatorConfig = common::config_in(dir.path());
    config.leaks = leak_config();
    let coordinator = ResilienceCoordinator::builder(config).build();

    let calls = Arc::new(AtomicU32::new(0));
    for id in ["a", "b", "c"] {
        let release = counting_release(&calls);
        coordinator
            .leaks()
            .register(id, ConnectionKind::Socket, "gateway", || async move {
                Ok::<_, Infallible>(Tracked::new(Subscription::default(), release))
            })
            .await
            .unwrap();
    }

    assert_eq!(coordinator.status().active_connections, 3);
    assert_eq!(coordinator.leaks().release("b"), ReleaseOutcome::Released);
    assert_eq!(coordinator.status().active_connections, 2);
    assert_eq!(coordinator.status().active_leaks, 0);

    coordinator.shutdown();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(coordinator.status().active_connections, 0);
}
