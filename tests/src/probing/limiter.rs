#![cfg(test)]
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rangeping_core::limiter::{ConcurrencyLimiter, LimiterError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Waits until `count` callers are queued on `limiter`.
async fn until_queued(limiter: &ConcurrencyLimiter, count: usize) {
    while limiter.queued() < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn waiters_are_admitted_in_arrival_order() {
    let limiter = Arc::new(ConcurrencyLimiter::new(1));
    let order = Arc::new(Mutex::new(Vec::new()));
    limiter.acquire().await;

    let mut waiters = JoinSet::new();
    for id in 0..5 {
        let waiter_limiter = Arc::clone(&limiter);
        let order = Arc::clone(&order);
        waiters.spawn(async move {
            waiter_limiter.acquire().await;
            order.lock().unwrap().push(id);
            waiter_limiter.release();
        });
        until_queued(&limiter, id + 1).await;
    }

    limiter.release();
    while waiters.join_next().await.is_some() {}

    assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3, 4]);
    assert_eq!(limiter.available_permits(), 1);
}

#[tokio::test]
async fn cancelled_waiter_hands_its_turn_to_the_next() {
    let limiter = Arc::new(ConcurrencyLimiter::new(1));
    let first = limiter.acquire_owned(&CancellationToken::new()).await.unwrap();

    let doomed = CancellationToken::new();
    let doomed_task = {
        let limiter = Arc::clone(&limiter);
        let token = doomed.clone();
        tokio::spawn(async move { limiter.acquire_owned(&token).await.map(drop) })
    };
    until_queued(&limiter, 1).await;

    let patient = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move { limiter.acquire_owned(&CancellationToken::new()).await })
    };
    until_queued(&limiter, 2).await;

    doomed.cancel();
    assert!(matches!(doomed_task.await.unwrap(), Err(LimiterError::Cancelled)));
    assert_eq!(limiter.queued(), 1);

    drop(first);
    let permit = patient.await.unwrap().unwrap();
    assert_eq!(limiter.available_permits(), 0);
    drop(permit);
    assert_eq!(limiter.available_permits(), 1);
}

#[tokio::test]
async fn accounting_survives_mixed_cancellation() {
    let limiter = Arc::new(ConcurrencyLimiter::new(3));
    let mut units = JoinSet::new();
    let mut tokens = Vec::new();

    for unit in 0..40u64 {
        let limiter = Arc::clone(&limiter);
        let token = CancellationToken::new();
        tokens.push(token.clone());
        units.spawn(async move {
            let permit = limiter.acquire_owned(&token).await?;
            tokio::time::sleep(Duration::from_millis(unit % 3)).await;
            drop(permit);
            Ok::<_, LimiterError>(())
        });
    }
    for token in tokens.iter().step_by(3) {
        token.cancel();
    }

    let mut admitted = 0;
    while let Some(joined) = units.join_next().await {
        if joined.unwrap().is_ok() {
            admitted += 1;
        }
    }

    assert!(admitted >= 26, "only cancelled units may miss out");
    assert_eq!(limiter.available_permits(), 3);
    assert_eq!(limiter.queued(), 0);
}
