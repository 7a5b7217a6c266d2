//! Socket utilities for mDNS.
//!
//! This module provides [`MulticastSocket`], a builder for creating properly
//! configured UDP sockets for IPv6 mDNS communication.
//!
//! # Example
//!
//! ```rust,ignore
//! use mdns_responder::MulticastSocket;
//!
//! let std_socket = MulticastSocket::new().into_std()?;
//!
//! // For tokio:
//! let socket = tokio::net::UdpSocket::from_std(std_socket)?;
//! ```

use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::proto::{MDNS_MULTICAST_IPV6, MDNS_PORT};

/// A builder for creating multicast UDP sockets suitable for mDNS.
///
/// The resulting socket will be:
///
/// - Bound to `[::]:5353` (or the configured port)
/// - Configured with `SO_REUSEADDR` enabled
/// - Configured with `SO_REUSEPORT` enabled (on supported platforms)
/// - Set to non-blocking mode for async compatibility
/// - Joined to the mDNS multicast group (`ff02::fb`)
#[derive(Debug, Clone, Default)]
pub struct MulticastSocket {
    port: Option<u16>,
    interface: Option<u32>,
}

impl MulticastSocket {
    /// Creates a new `MulticastSocket` builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the local port to bind, mainly useful for testing. The
    /// default is the standard mDNS port, 5353.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets a specific network interface (by index) for multicast
    /// operations. If not set, the socket joins the multicast group on the
    /// default interface.
    pub fn with_interface(mut self, interface: u32) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Converts this builder into a configured `std::net::UdpSocket`.
    ///
    /// # Errors
    ///
    /// Returns an error if socket creation, configuration, binding, or
    /// joining the multicast group fails.
    pub fn into_std(self) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;

        // Allow multiple mDNS responders to share the port.
        socket.set_reuse_address(true)?;

        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;

        // mDNS traffic stays on the local link.
        socket.set_only_v6(true)?;
        socket.set_nonblocking(true)?;

        let port = self.port.unwrap_or(MDNS_PORT);
        let bind_addr = SocketAddr::from(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
        socket.bind(&bind_addr.into())?;

        let interface = self.interface.unwrap_or(0);
        socket.join_multicast_v6(&MDNS_MULTICAST_IPV6, interface)?;
        socket.set_multicast_hops_v6(255)?;

        Ok(socket.into())
    }
}
