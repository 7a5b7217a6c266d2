//! # mdns-responder
//!
//! A sans-I/O Multicast DNS (mDNS) responder implementing RFC 6762, suitable
//! for network stacks that advertise hosts, services, and key records on the
//! local link.
//!
//! The responder claims each registered name by probing, announces the
//! resulting records, answers queries from peers (including sub-type and
//! meta-queries), defends names against conflicts, and sends "goodbye"
//! records on removal. It drives a single UDP socket on port 5353.
//!
//! ## Sans-I/O Design
//!
//! [`Responder`] implements the [`shared::Protocol`] trait and performs no
//! I/O of its own. The caller is responsible for:
//!
//! 1. Reading datagrams from the network and calling `handle_read()`
//! 2. Sending packets returned by `poll_write()`
//! 3. Calling `handle_timeout()` when `poll_timeout()` expires
//! 4. Processing events from `poll_event()`
//!
//! ## Quick Start
//!
//! ```rust
//! use mdns_responder::{Responder, ResponderConfig, HostInfo};
//! use shared::Protocol;
//! use std::time::Instant;
//!
//! let now = Instant::now();
//! let mut responder = Responder::new(ResponderConfig::default());
//! responder.set_enabled(true, now).unwrap();
//!
//! responder
//!     .register_host(
//!         HostInfo {
//!             host_name: "myhost".to_string(),
//!             addresses: vec!["2001:db8::1".parse().unwrap()],
//!             ttl: 0, // 0 selects the default TTL (120 s)
//!         },
//!         1, // request id, echoed back in the registration event
//!         now,
//!     )
//!     .unwrap();
//!
//! // Drive the probe timers; probe packets appear via poll_write().
//! while let Some(deadline) = responder.poll_timeout() {
//!     if deadline > now + std::time::Duration::from_secs(2) {
//!         break;
//!     }
//!     responder.handle_timeout(deadline).unwrap();
//! }
//! assert!(responder.poll_write().is_some());
//! ```
//!
//! ## Event Loop Pattern
//!
//! ```text
//! loop {
//!     while let Some(packet) = responder.poll_write() {
//!         socket.send_to(&packet.message, packet.transport.peer_addr);
//!     }
//!     select! {
//!         datagram = socket.recv_from() => responder.handle_read(datagram),
//!         _ = sleep_until(responder.poll_timeout()) => {
//!             responder.handle_timeout(Instant::now());
//!         }
//!     }
//!     while let Some(event) = responder.poll_event() {
//!         // Registered / RegisterFailed / Conflict
//!     }
//! }
//! ```
//!
//! ## Protocol Details
//!
//! - **Multicast Address**: `[ff02::fb]:5353` (IPv6)
//! - **Advertised records**: AAAA, SRV, TXT, PTR, KEY, NSEC
//! - **TTLs**: 120 s for address/SRV/TXT/PTR/KEY; 4500 s for NSEC and the
//!   `_services._dns-sd._udp` meta PTR
//! - **Compression**: DNS name compression across all sections of a message

#![warn(rust_2018_idioms)]

pub(crate) mod config;
pub(crate) mod message;
pub(crate) mod proto;
pub(crate) mod socket;

pub use config::ResponderConfig;
pub use proto::{
    HostInfo, KeyInfo, RequestId, Responder, ResponderEvent, ServiceInfo, MDNS_DEST_ADDR,
    MDNS_MULTICAST_IPV6, MDNS_PORT,
};
pub use socket::MulticastSocket;
