use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;

use bytes::BytesMut;

/// Type of transport protocol, either UDP or TCP.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportProtocol {
    /// UDP
    #[default]
    UDP,
    /// TCP
    TCP,
}

/// Transport context with local address, peer address and protocol.
///
/// For received datagrams, `local_addr` is the address the datagram was
/// delivered to; a multicast `local_addr` marks a datagram received via the
/// multicast group rather than via unicast.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportContext {
    /// Local socket address, either IPv4 or IPv6
    pub local_addr: SocketAddr,
    /// Peer socket address, either IPv4 or IPv6
    pub peer_addr: SocketAddr,
    /// Type of transport protocol, either UDP or TCP
    pub transport_protocol: TransportProtocol,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self {
            local_addr: SocketAddr::from_str("0.0.0.0:0").unwrap(),
            peer_addr: SocketAddr::from_str("0.0.0.0:0").unwrap(),
            transport_protocol: TransportProtocol::UDP,
        }
    }
}

/// A generic transmit with [`TransportContext`].
pub struct TransportMessage<T> {
    /// Received/Sent time
    pub now: Instant,
    /// A transport context with [`local_addr`](TransportContext::local_addr) and [`peer_addr`](TransportContext::peer_addr)
    pub transport: TransportContext,
    /// Message body with generic type
    pub message: T,
}

/// BytesMut type transmit with [`TransportContext`].
pub type TaggedBytesMut = TransportMessage<BytesMut>;
