//! # Echo Engine Boundary
//!
//! A probe session does not know how echo exchanges are carried out. It asks an
//! [`EchoEngine`] to prepare itself for one target, then consumes the stream of
//! [`EchoEvent`]s the engine publishes until it decides the session is over.
//!
//! Two engines ship with the crate:
//! * [`icmp::IcmpEngine`]: ICMP echo over a raw socket (needs privileges).
//! * [`tcp::TcpEngine`]: TCP connect attempts, usable without privileges.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rangeping_common::config::{EchoConfig, ProbeMethod};
use tokio::sync::mpsc::UnboundedSender;

use crate::network::transport::LazyIcmpSocket;

pub mod icmp;
pub mod tcp;

/// A notification published by a running engine.
///
/// Sequence numbers increase monotonically within each kind of event, but the
/// two kinds may interleave in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoEvent {
    /// Echo request `sequence` went out.
    Sent { sequence: u64 },
    /// Echo request `sequence` was answered after `round_trip`.
    Reply { sequence: u64, round_trip: Duration },
}

/// Carries out echo exchanges against a single target.
#[async_trait]
pub trait EchoEngine: Send {
    /// Prepares the engine (resolve the target, open sockets, ...).
    ///
    /// An error means the target cannot be probed at all.
    async fn setup(&mut self) -> anyhow::Result<()>;

    /// Starts emitting requests, publishing every send and reply on `events`
    /// until [`EchoEngine::stop`] is called.
    fn start(&mut self, events: UnboundedSender<EchoEvent>);

    fn stop(&mut self);
}

#[async_trait]
impl EchoEngine for Box<dyn EchoEngine> {
    async fn setup(&mut self) -> anyhow::Result<()> {
        (**self).setup().await
    }

    fn start(&mut self, events: UnboundedSender<EchoEvent>) {
        (**self).start(events)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Creates one fresh engine per probed target.
pub trait EchoEngineProvider: Send + Sync + 'static {
    type Engine: EchoEngine + 'static;

    fn engine(&self, target: &str) -> Self::Engine;
}

/// Provider picking the engine matching the configured [`ProbeMethod`].
///
/// ICMP engines created by one provider (and its clones) share a single raw
/// socket, opened when the first of them is set up.
#[derive(Clone)]
pub struct MethodProvider {
    method: ProbeMethod,
    config: EchoConfig,
    icmp: Arc<LazyIcmpSocket>,
}

impl MethodProvider {
    pub fn new(method: ProbeMethod, config: EchoConfig) -> Self {
        Self {
            method,
            config,
            icmp: Arc::new(LazyIcmpSocket::default()),
        }
    }
}

impl EchoEngineProvider for MethodProvider {
    type Engine = Box<dyn EchoEngine>;

    fn engine(&self, target: &str) -> Self::Engine {
        match self.method {
            ProbeMethod::Icmp => Box::new(icmp::IcmpEngine::new(
                target,
                self.config,
                Arc::clone(&self.icmp),
            )),
            ProbeMethod::Tcp => Box::new(tcp::TcpEngine::new(target, self.config)),
        }
    }
}

/// Resolves a target given as an address literal or a host name.
///
/// IPv4 answers are preferred over IPv6 ones.
pub(crate) async fn resolve(target: &str) -> anyhow::Result<IpAddr> {
    if let Ok(addr) = target.parse::<IpAddr>() {
        return Ok(addr);
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((target, 0))
        .await
        .with_context(|| format!("resolving {target}"))?
        .map(|socket_addr| socket_addr.ip())
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .with_context(|| format!("{target} has no address"))
}
