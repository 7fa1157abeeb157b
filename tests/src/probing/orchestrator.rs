#![cfg(test)]
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rangeping_common::network::probe::ProbeResult;
use rangeping_core::limiter::ConcurrencyLimiter;
use rangeping_core::orchestrator::ProbeOrchestrator;

use super::support::{FakeProvider, ProgressLog, targets};

fn orchestrator(
    capacity: usize,
    provider: FakeProvider,
    echo_limit: u64,
    log: &ProgressLog,
) -> ProbeOrchestrator<FakeProvider> {
    let sink = log.clone();
    ProbeOrchestrator::new(Arc::new(ConcurrencyLimiter::new(capacity)), provider, echo_limit)
        .with_progress_observer(move |progress| sink.record(progress))
}

/// Progress starts at zero, grows one unit at a time and hits 1.0 exactly once.
fn assert_progress_well_formed(log: &ProgressLog, total: usize) {
    let updates = log.updates();
    assert_eq!(updates.len(), total + 1);
    assert_eq!(updates[0].completed, 0);
    assert!(updates.windows(2).all(|w| w[1].completed == w[0].completed + 1));
    assert!(updates.iter().all(|p| p.total == total));

    let complete = updates.iter().filter(|p| p.fraction() == 1.0).count();
    assert_eq!(complete, 1, "progress must reach 1.0 exactly once");
}

#[tokio::test]
async fn hundred_targets_under_capacity_ten() {
    let provider = FakeProvider::default();
    let gauge = provider.gauge.clone();
    let log = ProgressLog::default();
    let orchestrator = orchestrator(10, provider, 4, &log);

    let results: Vec<ProbeResult> = orchestrator.run(targets(100)).await;

    assert_eq!(results.len(), 100);
    let unique: HashSet<&str> = results.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(unique.len(), 100);
    for result in &results {
        assert_eq!(result.transmitted, 4);
        assert_eq!(result.received, 4);
        assert_eq!(result.mean_round_trip, Duration::from_millis(15));
    }

    assert!(gauge.peak() <= 10, "peak of {} sessions", gauge.peak());
    assert_eq!(gauge.active(), 0);
    assert_progress_well_formed(&log, 100);
    assert_eq!(orchestrator.progress(), 1.0);
    assert_eq!(orchestrator.limiter().available_permits(), 10);
}

#[tokio::test]
async fn unreachable_targets_are_dropped() {
    let mut provider = FakeProvider::default();
    let all = targets(10);
    provider.unreachable = all.iter().take(3).cloned().collect();
    let log = ProgressLog::default();
    let orchestrator = orchestrator(4, provider, 3, &log);

    let results = orchestrator.run(all.clone()).await;

    assert_eq!(results.len(), 7);
    assert!(results.iter().all(|r| !all[..3].contains(&r.target)));
    assert_progress_well_formed(&log, 10);
}

#[tokio::test]
async fn silent_sequences_count_as_loss() {
    let provider = FakeProvider {
        reply_to_odd: false,
        ..FakeProvider::default()
    };
    let log = ProgressLog::default();
    let orchestrator = orchestrator(2, provider, 4, &log);

    let results = orchestrator.run(targets(3)).await;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!((result.transmitted, result.received), (4, 2));
        assert!((result.loss_fraction() - 0.5).abs() < 1e-9);
    }
}

#[tokio::test]
async fn empty_target_list_completes_at_once() {
    let log = ProgressLog::default();
    let orchestrator = orchestrator(3, FakeProvider::default(), 4, &log);

    assert!(orchestrator.run(Vec::new()).await.is_empty());
    assert_progress_well_formed(&log, 0);
}

#[tokio::test]
async fn cancelling_skips_waiting_targets() {
    let provider = FakeProvider {
        period: Duration::from_millis(20),
        ..FakeProvider::default()
    };
    let gauge = provider.gauge.clone();
    let log = ProgressLog::default();
    let orchestrator = Arc::new(orchestrator(2, provider, 3, &log));

    let cancel = orchestrator.cancellation_token();
    let watcher = log.clone();
    let canceller = tokio::spawn(async move {
        while watcher.updates().last().map_or(0, |p| p.completed) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
    });

    let results = orchestrator.run(targets(20)).await;
    canceller.await.unwrap();

    assert!(results.len() >= 2, "sessions admitted before cancel finish");
    assert!(results.len() < 20, "waiting targets are skipped");
    assert!(results.iter().all(|r| r.transmitted == 3));

    assert_progress_well_formed(&log, 20);
    assert_eq!(gauge.active(), 0);
    assert_eq!(orchestrator.limiter().available_permits(), 2);
    assert_eq!(orchestrator.limiter().queued(), 0);
}
