//! ICMP echo engine.
//!
//! Requests go out through the run's shared raw socket at a fixed period. The
//! socket's listener routes echo replies by identifier, so the driver task
//! only sees the replies carrying the identifier it subscribed to.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use async_trait::async_trait;
use pnet::packet::Packet;
use pnet::packet::icmp::IcmpTypes;
use pnet::packet::icmp::echo_request::{self, EchoRequestPacket, MutableEchoRequestPacket};
use rangeping_common::config::EchoConfig;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{EchoEngine, EchoEvent};
use crate::network::transport::{
    Captured, EchoSubscription, IcmpSocket, LazyIcmpSocket, parse_echo_reply,
};

const ECHO_HEADER_LEN: usize = 8;
const ECHO_PAYLOAD: &[u8] = b"rangeping-echo-payload-32-bytes!";

pub struct IcmpEngine {
    target: String,
    config: EchoConfig,
    shared: Arc<LazyIcmpSocket>,
    addr: Option<Ipv4Addr>,
    link: Option<(Arc<IcmpSocket>, EchoSubscription)>,
    stop: CancellationToken,
}

impl IcmpEngine {
    /// `shared` is opened on the first setup and reused by every engine
    /// holding the same handle.
    pub fn new(
        target: impl Into<String>,
        config: EchoConfig,
        shared: Arc<LazyIcmpSocket>,
    ) -> Self {
        Self {
            target: target.into(),
            config,
            shared,
            addr: None,
            link: None,
            stop: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl EchoEngine for IcmpEngine {
    async fn setup(&mut self) -> anyhow::Result<()> {
        let addr = match super::resolve(&self.target).await? {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => bail!("ICMP engine only supports IPv4, got {v6}"),
        };
        let socket = self
            .shared
            .get()
            .context("opening ICMP socket (root privileges required)")?;
        let subscription = socket.subscribe().context("no free ICMP echo identifier")?;

        self.addr = Some(addr);
        self.link = Some((socket, subscription));
        Ok(())
    }

    fn start(&mut self, events: UnboundedSender<EchoEvent>) {
        let (Some(addr), Some((socket, subscription))) = (self.addr, self.link.take()) else {
            debug!("ICMP engine for {} started without setup", self.target);
            return;
        };
        let driver = Driver {
            addr,
            identifier: subscription.identifier(),
            config: self.config,
            socket,
            events,
            in_flight: HashMap::new(),
        };
        tokio::spawn(driver.run(subscription, self.stop.clone()));
    }

    fn stop(&mut self) {
        self.stop.cancel();
    }
}

impl Drop for IcmpEngine {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Driver {
    addr: Ipv4Addr,
    identifier: u16,
    config: EchoConfig,
    socket: Arc<IcmpSocket>,
    events: UnboundedSender<EchoEvent>,
    /// Wire sequence number -> (sequence, send time).
    in_flight: HashMap<u16, (u64, Instant)>,
}

impl Driver {
    /// Ends on stop or when the session stops listening. Dropping
    /// `subscription` on the way out frees the identifier.
    async fn run(mut self, mut subscription: EchoSubscription, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence: u64 = 0;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    // A request that fails locally still counts as sent and lost.
                    if let Err(e) = self.send_request(sequence) {
                        debug!("Echo request {sequence} to {} failed: {e}", self.addr);
                    }
                    if self.events.send(EchoEvent::Sent { sequence }).is_err() {
                        break;
                    }
                    sequence += 1;
                }
                packet = subscription.recv() => {
                    let Some(packet) = packet else { break };
                    if let Some(event) = self.match_reply(&packet) {
                        if self.events.send(event).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    fn send_request(&mut self, sequence: u64) -> anyhow::Result<()> {
        let wire_sequence = sequence as u16;
        let buffer = build_echo_request(self.identifier, wire_sequence)?;
        let packet = EchoRequestPacket::new(&buffer).context("truncated echo request")?;

        self.in_flight.insert(wire_sequence, (sequence, Instant::now()));
        self.socket.send_to(packet, IpAddr::V4(self.addr))?;
        Ok(())
    }

    fn match_reply(&mut self, packet: &Captured) -> Option<EchoEvent> {
        if packet.source != IpAddr::V4(self.addr) {
            return None;
        }
        let (identifier, wire_sequence) = parse_echo_reply(&packet.bytes)?;
        if identifier != self.identifier {
            return None;
        }

        let (sequence, sent_at) = self.in_flight.remove(&wire_sequence)?;
        let round_trip = packet.received_at.saturating_duration_since(sent_at);
        if round_trip > self.config.timeout {
            return None;
        }
        Some(EchoEvent::Reply {
            sequence,
            round_trip,
        })
    }
}

fn build_echo_request(identifier: u16, sequence: u16) -> anyhow::Result<Vec<u8>> {
    let mut buffer = vec![0u8; ECHO_HEADER_LEN + ECHO_PAYLOAD.len()];
    let mut packet =
        MutableEchoRequestPacket::new(&mut buffer).context("echo request buffer too small")?;
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(echo_request::IcmpCodes::NoCode);
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet.set_payload(ECHO_PAYLOAD);
    let checksum = pnet::util::checksum(packet.packet(), 1);
    packet.set_checksum(checksum);
    Ok(buffer)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
