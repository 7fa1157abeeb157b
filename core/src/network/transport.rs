//! # Shared ICMP Transport
//!
//! One raw ICMP socket serves every echo engine of a run. A single listener
//! thread captures the replies and routes each one to the engine that
//! subscribed to its echo identifier, so the number of open sockets and
//! threads does not grow with concurrency.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use pnet::{
    packet::{
        Packet,
        icmp::{IcmpPacket, IcmpTypes, echo_reply::EchoReplyPacket},
        ip::IpNextHeaderProtocols,
    },
    transport::{
        self, TransportChannelType, TransportProtocol, TransportReceiver, TransportSender,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const TRANSPORT_BUFFER_SIZE: usize = 4096;
const CHANNEL_TYPE_ICMP: TransportChannelType =
    TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
/// How often the listener checks whether anyone is still interested.
const LISTENER_POLL: Duration = Duration::from_millis(50);
/// Random draws tried before giving up on finding a free identifier.
const IDENTIFIER_ATTEMPTS: usize = 64;

/// An ICMP message as captured by the listener thread.
#[derive(Debug, Clone)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub source: IpAddr,
    pub received_at: Instant,
}

/// Extracts `(identifier, sequence)` from an ICMP echo reply.
pub(crate) fn parse_echo_reply(bytes: &[u8]) -> Option<(u16, u16)> {
    let icmp = IcmpPacket::new(bytes)?;
    if icmp.get_icmp_type() != IcmpTypes::EchoReply {
        return None;
    }
    let reply = EchoReplyPacket::new(bytes)?;
    Some((reply.get_identifier(), reply.get_sequence_number()))
}

/// Echo identifier -> the engine listening for it.
#[derive(Default)]
struct EchoRoutes {
    table: Mutex<HashMap<u16, mpsc::UnboundedSender<Captured>>>,
}

impl EchoRoutes {
    /// Reserves a random identifier no other subscriber holds.
    fn subscribe(self: &Arc<Self>) -> Option<EchoSubscription> {
        let mut table = self.lock();
        for _ in 0..IDENTIFIER_ATTEMPTS {
            let identifier: u16 = rand::random();
            if let Entry::Vacant(slot) = table.entry(identifier) {
                let (tx, replies) = mpsc::unbounded_channel();
                slot.insert(tx);
                return Some(EchoSubscription {
                    identifier,
                    routes: Arc::clone(self),
                    replies,
                });
            }
        }
        None
    }

    /// Hands an echo reply to the subscriber of its identifier. Anything else
    /// is dropped; returns whether the message was delivered.
    fn dispatch(&self, captured: Captured) -> bool {
        let Some((identifier, _)) = parse_echo_reply(&captured.bytes) else {
            return false;
        };
        self.lock()
            .get(&identifier)
            .is_some_and(|route| route.send(captured).is_ok())
    }

    fn unsubscribe(&self, identifier: u16) {
        self.lock().remove(&identifier);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, mpsc::UnboundedSender<Captured>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replies addressed to one echo identifier. Dropping it frees the identifier.
pub struct EchoSubscription {
    identifier: u16,
    routes: Arc<EchoRoutes>,
    replies: mpsc::UnboundedReceiver<Captured>,
}

impl EchoSubscription {
    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub async fn recv(&mut self) -> Option<Captured> {
        self.replies.recv().await
    }
}

impl Drop for EchoSubscription {
    fn drop(&mut self) {
        self.routes.unsubscribe(self.identifier);
    }
}

/// A layer-4 ICMPv4 socket with its listener thread.
pub struct IcmpSocket {
    tx: Mutex<TransportSender>,
    routes: Arc<EchoRoutes>,
}

impl IcmpSocket {
    /// Opens the socket and starts the listener. Fails without raw-socket
    /// privileges.
    pub fn open() -> io::Result<Self> {
        let (tx, rx) = transport::transport_channel(TRANSPORT_BUFFER_SIZE, CHANNEL_TYPE_ICMP)?;
        let routes = Arc::new(EchoRoutes::default());
        spawn_icmp_listener(rx, Arc::downgrade(&routes));
        debug!("Opened shared ICMP socket");
        Ok(Self {
            tx: Mutex::new(tx),
            routes,
        })
    }

    /// Claims a free echo identifier, `None` when all draws collided.
    pub fn subscribe(&self) -> Option<EchoSubscription> {
        self.routes.subscribe()
    }

    /// Engines currently holding an identifier.
    pub fn subscribers(&self) -> usize {
        self.routes.len()
    }

    pub fn send_to<T: Packet>(&self, packet: T, destination: IpAddr) -> io::Result<usize> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send_to(packet, destination)
    }
}

/// Opens the shared socket on first use and hands out the same one after.
///
/// A failed open is not remembered; the next caller tries again.
#[derive(Default)]
pub struct LazyIcmpSocket {
    socket: Mutex<Option<Arc<IcmpSocket>>>,
}

impl LazyIcmpSocket {
    pub fn get(&self) -> io::Result<Arc<IcmpSocket>> {
        let mut slot = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(socket) = slot.as_ref() {
            return Ok(Arc::clone(socket));
        }
        let socket = Arc::new(IcmpSocket::open()?);
        *slot = Some(Arc::clone(&socket));
        Ok(socket)
    }
}

/// Moves `rx_socket` to a listener thread routing replies through `routes`.
///
/// The thread exits once the socket and every subscription are gone.
fn spawn_icmp_listener(mut rx_socket: TransportReceiver, routes: Weak<EchoRoutes>) {
    std::thread::spawn(move || {
        let mut iterator = transport::icmp_packet_iter(&mut rx_socket);
        loop {
            let captured = match iterator.next_with_timeout(LISTENER_POLL) {
                Ok(Some((packet, source))) => Some(Captured {
                    bytes: packet.packet().to_vec(),
                    source,
                    received_at: Instant::now(),
                }),
                Ok(None) => None,
                Err(e) => {
                    debug!("ICMP listener stopped: {e}");
                    break;
                }
            };
            let Some(routes) = routes.upgrade() else {
                trace!("ICMP listener has no subscribers left");
                break;
            };
            if let Some(captured) = captured {
                routes.dispatch(captured);
            }
        }
    });
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
