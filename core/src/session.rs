//! # Probe Session
//!
//! Drives one target through a bounded series of echo exchanges and reduces
//! what the engine reported into a single [`ProbeResult`].
//!
//! The lifecycle is:
//!
//! ```text
//! Created -> AwaitingSetup -> SetupFailed            (no result)
//!                          -> Active -> Finished     (one result)
//! ```
//!
//! Engine events arrive on one channel and are folded by a single loop, so
//! send and reply bookkeeping never race with the termination check.

use std::time::Duration;

use rangeping_common::network::probe::ProbeResult;
use tokio::sync::mpsc;
use tracing::debug;

use crate::echo::{EchoEngine, EchoEvent};

/// What recording an event did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The terminating send was seen; the session is over.
    Finished,
}

/// Bookkeeping of an active session.
#[derive(Debug, Clone, Default)]
pub struct SessionTally {
    echo_limit: u64,
    sent: u64,
    replied: u64,
    round_trips: Vec<Duration>,
    finished: bool,
}

impl SessionTally {
    pub fn new(echo_limit: u64) -> Self {
        Self {
            echo_limit,
            ..Self::default()
        }
    }

    /// Folds one engine event into the tally.
    ///
    /// The first send numbered at or beyond the echo limit ends the session.
    /// Replies beyond the limit are not counted, and nothing is recorded once
    /// the session has finished.
    pub fn record(&mut self, event: EchoEvent) -> Step {
        if self.finished {
            return Step::Finished;
        }
        match event {
            EchoEvent::Sent { sequence } if sequence >= self.echo_limit => {
                self.finished = true;
                return Step::Finished;
            }
            EchoEvent::Sent { .. } => self.sent += 1,
            EchoEvent::Reply { sequence, round_trip } if sequence < self.echo_limit => {
                self.replied += 1;
                self.round_trips.push(round_trip);
            }
            EchoEvent::Reply { .. } => {}
        }
        Step::Continue
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Mean of the recorded round trips, zero when none were recorded.
    pub fn mean_round_trip(&self) -> Duration {
        match u32::try_from(self.round_trips.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.round_trips.iter().sum::<Duration>() / count,
        }
    }

    pub fn summarize(&self, target: &str) -> ProbeResult {
        ProbeResult::new(target, self.sent, self.replied, self.mean_round_trip())
    }
}

/// One probe attempt against one target.
pub struct ProbeSession<E> {
    target: String,
    echo_limit: u64,
    engine: E,
}

impl<E: EchoEngine> ProbeSession<E> {
    pub fn new(target: impl Into<String>, echo_limit: u64, engine: E) -> Self {
        Self {
            target: target.into(),
            echo_limit,
            engine,
        }
    }

    /// Runs the session to a terminal state.
    ///
    /// Returns `None` when the engine could not be set up: such a target is
    /// dropped rather than recorded as fully lost.
    pub async fn run(mut self) -> Option<ProbeResult> {
        if let Err(e) = self.engine.setup().await {
            debug!("Dropping {}: {e:#}", self.target);
            return None;
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        self.engine.start(events_tx);
        debug!("Probing {} ({} echoes)", self.target, self.echo_limit);

        let mut tally = SessionTally::new(self.echo_limit);
        while let Some(event) = events_rx.recv().await {
            if tally.record(event) == Step::Finished {
                break;
            }
        }
        self.engine.stop();

        if !tally.is_finished() {
            debug!("Engine for {} went quiet before the last echo", self.target);
        }
        Some(tally.summarize(&self.target))
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc::UnboundedSender;

    fn sent(sequence: u64) -> EchoEvent {
        EchoEvent::Sent { sequence }
    }

    fn reply(sequence: u64, millis: u64) -> EchoEvent {
        EchoEvent::Reply {
            sequence,
            round_trip: Duration::from_millis(millis),
        }
    }

    /// Replays a fixed script of events as soon as it is started.
    struct ScriptedEngine {
        script: Vec<EchoEvent>,
        setup_ok: bool,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedEngine {
        fn new(script: Vec<EchoEvent>) -> Self {
            Self {
                script,
                setup_ok: true,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl EchoEngine for ScriptedEngine {
        async fn setup(&mut self) -> anyhow::Result<()> {
            anyhow::ensure!(self.setup_ok, "permission denied");
            Ok(())
        }

        fn start(&mut self, events: UnboundedSender<EchoEvent>) {
            for event in self.script.drain(..) {
                let _ = events.send(event);
            }
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn tally_counts_sends_and_replies_below_limit() {
        let mut tally = SessionTally::new(5);
        let script = [
            sent(0),
            reply(0, 10),
            sent(1),
            sent(2),
            reply(2, 20),
            sent(3),
            sent(4),
            reply(4, 60),
        ];
        for event in script {
            assert_eq!(tally.record(event), Step::Continue);
        }
        assert_eq!(tally.record(sent(5)), Step::Finished);

        let result = tally.summarize("104.16.0.1");
        assert_eq!(result.transmitted, 5);
        assert_eq!(result.received, 3);
        assert!((result.loss_fraction() - 0.4).abs() < 1e-9);
        assert_eq!(result.mean_round_trip, Duration::from_millis(30));
    }

    #[test]
    fn tally_ignores_replies_beyond_limit() {
        let mut tally = SessionTally::new(2);
        tally.record(reply(2, 5));
        tally.record(reply(7, 5));
        assert_eq!(tally.summarize("x").received, 0);
        assert_eq!(tally.mean_round_trip(), Duration::ZERO);
    }

    #[test]
    fn tally_is_frozen_after_termination() {
        let mut tally = SessionTally::new(1);
        tally.record(sent(0));
        assert_eq!(tally.record(sent(1)), Step::Finished);
        assert!(tally.is_finished());

        assert_eq!(tally.record(reply(0, 10)), Step::Finished);
        assert_eq!(tally.record(sent(2)), Step::Finished);

        let result = tally.summarize("x");
        assert_eq!((result.transmitted, result.received), (1, 0));
    }

    #[test]
    fn tally_accepts_replies_before_their_send_event() {
        let mut tally = SessionTally::new(2);
        for event in [reply(0, 4), sent(0), reply(1, 8), sent(1), sent(2)] {
            tally.record(event);
        }
        let result = tally.summarize("x");
        assert_eq!((result.transmitted, result.received), (2, 2));
        assert_eq!(result.mean_round_trip, Duration::from_millis(6));
    }

    #[tokio::test]
    async fn session_produces_aggregate_and_stops_engine() {
        let engine = ScriptedEngine::new(vec![
            sent(0),
            reply(0, 10),
            sent(1),
            sent(2),
            reply(1, 30),
            sent(3),
            // Past the limit: must not be counted.
            reply(2, 1000),
        ]);
        let stopped = Arc::clone(&engine.stopped);

        let result = ProbeSession::new("1.0.0.1", 3, engine).run().await.unwrap();
        assert_eq!(result.target, "1.0.0.1");
        assert_eq!((result.transmitted, result.received), (3, 2));
        assert_eq!(result.mean_round_trip, Duration::from_millis(20));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn session_setup_failure_yields_nothing() {
        let mut engine = ScriptedEngine::new(vec![sent(0), sent(1)]);
        engine.setup_ok = false;
        let stopped = Arc::clone(&engine.stopped);

        assert!(ProbeSession::new("1.0.0.1", 1, engine).run().await.is_none());
        assert!(!stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn session_reports_partial_tally_when_engine_goes_quiet() {
        let engine = ScriptedEngine::new(vec![sent(0), reply(0, 12), sent(1)]);
        let result = ProbeSession::new("1.0.0.1", 8, engine).run().await.unwrap();
        assert_eq!((result.transmitted, result.received), (2, 1));
    }
}
