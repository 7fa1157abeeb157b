//! TCP connect echo engine.
//!
//! Each "echo request" is a connection attempt to the configured port. A
//! completed handshake or an active refusal both prove the host answered, so
//! both count as a reply. Works without raw-socket privileges.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use rangeping_common::config::EchoConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{EchoEngine, EchoEvent};

pub struct TcpEngine {
    target: String,
    config: EchoConfig,
    addr: Option<IpAddr>,
    stop: CancellationToken,
}

impl TcpEngine {
    pub fn new(target: impl Into<String>, config: EchoConfig) -> Self {
        Self {
            target: target.into(),
            config,
            addr: None,
            stop: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl EchoEngine for TcpEngine {
    async fn setup(&mut self) -> anyhow::Result<()> {
        self.addr = Some(super::resolve(&self.target).await?);
        Ok(())
    }

    fn start(&mut self, events: UnboundedSender<EchoEvent>) {
        let Some(addr) = self.addr else {
            debug!("TCP engine for {} started without setup", self.target);
            return;
        };
        let socket_addr = SocketAddr::new(addr, self.config.port);
        tokio::spawn(drive(socket_addr, self.config, events, self.stop.clone()));
    }

    fn stop(&mut self) {
        self.stop.cancel();
    }
}

impl Drop for TcpEngine {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn drive(
    socket_addr: SocketAddr,
    config: EchoConfig,
    events: UnboundedSender<EchoEvent>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts: JoinSet<Option<(u64, Duration)>> = JoinSet::new();
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if events.send(EchoEvent::Sent { sequence }).is_err() {
                    break;
                }
                attempts.spawn(handshake_probe(socket_addr, config.timeout, sequence));
                sequence += 1;
            }
            Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                if let Ok(Some((sequence, round_trip))) = joined {
                    if events.send(EchoEvent::Reply { sequence, round_trip }).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// One connection attempt. `None` when the host stayed silent.
async fn handshake_probe(
    socket_addr: SocketAddr,
    probe_timeout: Duration,
    sequence: u64,
) -> Option<(u64, Duration)> {
    let started = Instant::now();
    match timeout(probe_timeout, TcpStream::connect(socket_addr)).await {
        Ok(Ok(_stream)) => Some((sequence, started.elapsed())),
        Ok(Err(e)) if is_answer(e.kind()) => Some((sequence, started.elapsed())),
        Ok(Err(_)) | Err(_) => None,
    }
}

fn is_answer(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
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
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn fast_config(port: u16) -> EchoConfig {
        EchoConfig {
            period: Duration::from_millis(10),
            timeout: Duration::from_millis(500),
            port,
        }
    }

    #[tokio::test]
    async fn handshake_probe_answers_from_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let result = handshake_probe(addr, Duration::from_millis(500), 4).await;
        let (sequence, _round_trip) = result.expect("listener should answer");
        assert_eq!(sequence, 4);
    }

    #[tokio::test]
    async fn engine_publishes_sends_and_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((_stream, _)) = listener.accept().await {}
        });

        let mut engine = TcpEngine::new("127.0.0.1", fast_config(port));
        engine.setup().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.start(tx);

        let mut sent = Vec::new();
        let mut replied = Vec::new();
        while replied.len() < 3 {
            match rx.recv().await {
                Some(EchoEvent::Sent { sequence }) => sent.push(sequence),
                Some(EchoEvent::Reply { sequence, .. }) => replied.push(sequence),
                None => break,
            }
        }
        engine.stop();

        assert!(sent.windows(2).all(|w| w[0] < w[1]));
        assert!(replied.iter().all(|seq| sent.contains(seq)));
        assert_eq!(replied.len(), 3);
    }

    #[tokio::test]
    async fn setup_fails_for_unresolvable_target() {
        let mut engine = TcpEngine::new("no such host!", fast_config(443));
        assert!(engine.setup().await.is_err());
    }

    #[test]
    fn refusals_count_as_answers() {
        assert!(is_answer(ErrorKind::ConnectionRefused));
        assert!(!is_answer(ErrorKind::TimedOut));
    }
}
