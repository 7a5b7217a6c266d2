#![warn(rust_2018_idioms)]

pub mod error;
pub mod protocol;
pub(crate) mod transport;

pub use protocol::Protocol;
pub use transport::{TaggedBytesMut, TransportContext, TransportMessage, TransportProtocol};
