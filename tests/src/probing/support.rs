#![cfg(test)]
//! Scripted echo engines standing in for the network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rangeping_common::network::probe::Progress;
use rangeping_core::echo::{EchoEngine, EchoEngineProvider, EchoEvent};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Counts engines between `start` and `stop` and remembers the peak.
#[derive(Clone, Default)]
pub struct ActivityGauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ActivityGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    target: String,
    period: Duration,
    round_trip: Duration,
    reply_to_odd: bool,
    fail_setup: bool,
    gauge: ActivityGauge,
    stop: Option<CancellationToken>,
}

#[async_trait]
impl EchoEngine for FakeEngine {
    async fn setup(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.fail_setup, "{} is unreachable", self.target);
        Ok(())
    }

    fn start(&mut self, events: UnboundedSender<EchoEvent>) {
        self.gauge.enter();
        let stop = CancellationToken::new();
        self.stop = Some(stop.clone());

        let period = self.period;
        let round_trip = self.round_trip;
        let reply_to_odd = self.reply_to_odd;
        tokio::spawn(async move {
            let mut sequence: u64 = 0;
            while !stop.is_cancelled() {
                if events.send(EchoEvent::Sent { sequence }).is_err() {
                    break;
                }
                if reply_to_odd || sequence % 2 == 0 {
                    let _ = events.send(EchoEvent::Reply {
                        sequence,
                        round_trip,
                    });
                }
                sequence += 1;
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
            self.gauge.leave();
        }
    }
}

/// Hands out [`FakeEngine`]s; targets listed in `unreachable` fail setup.
#[derive(Clone)]
pub struct FakeProvider {
    pub period: Duration,
    pub round_trip: Duration,
    pub reply_to_odd: bool,
    pub unreachable: HashSet<String>,
    pub gauge: ActivityGauge,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1),
            round_trip: Duration::from_millis(15),
            reply_to_odd: true,
            unreachable: HashSet::new(),
            gauge: ActivityGauge::default(),
        }
    }
}

impl EchoEngineProvider for FakeProvider {
    type Engine = FakeEngine;

    fn engine(&self, target: &str) -> Self::Engine {
        FakeEngine {
            target: target.to_string(),
            period: self.period,
            round_trip: self.round_trip,
            reply_to_odd: self.reply_to_odd,
            fail_setup: self.unreachable.contains(target),
            gauge: self.gauge.clone(),
            stop: None,
        }
    }
}

pub fn targets(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("198.51.{}.{}", i / 256, i % 256))
        .collect()
}

/// Collects every progress update published during a run.
#[derive(Clone, Default)]
pub struct ProgressLog(Arc<Mutex<Vec<Progress>>>);

impl ProgressLog {
    pub fn record(&self, progress: Progress) {
        self.0.lock().unwrap().push(progress);
    }

    pub fn updates(&self) -> Vec<Progress> {
        self.0.lock().unwrap().clone()
    }
}
