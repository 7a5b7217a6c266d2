//! Minimal mDNS responder: advertises a host and an HTTP service on the
//! local link until interrupted.
//!
//! Run with: `RUST_LOG=trace cargo run --example responder`
//! Then query it from another machine, e.g. `dns-sd -q demo-host.local aaaa`.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mdns_responder::{
    HostInfo, MulticastSocket, Responder, ResponderConfig, ServiceInfo, MDNS_DEST_ADDR,
};
use shared::{Protocol, TaggedBytesMut, TransportContext, TransportProtocol};

fn main() -> std::io::Result<()> {
    env_logger::init();

    let socket = MulticastSocket::new().into_std()?;
    // A blocking loop with a short read timeout keeps the demo free of any
    // async runtime.
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;

    let mut responder = Responder::new(ResponderConfig::default());
    responder.set_enabled(true, Instant::now()).unwrap();

    responder
        .register_host(
            HostInfo {
                host_name: "demo-host".to_string(),
                addresses: vec!["fe80::1".parse().unwrap()],
                ttl: 0,
            },
            1,
            Instant::now(),
        )
        .unwrap();
    responder
        .register_service(
            ServiceInfo {
                service_instance: "demo".to_string(),
                service_type: "_http._tcp".to_string(),
                host_name: "demo-host".to_string(),
                sub_type_labels: vec![],
                txt_data: b"\x06path=/".to_vec(),
                port: 8080,
                weight: 0,
                priority: 0,
                ttl: 0,
            },
            2,
            Instant::now(),
        )
        .unwrap();

    let mut buf = vec![0u8; 9000];
    loop {
        while let Some(packet) = responder.poll_write() {
            socket.send_to(&packet.message, packet.transport.peer_addr)?;
        }

        while let Some(event) = responder.poll_event() {
            println!("event: {event:?}");
        }

        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                let msg = TaggedBytesMut {
                    now: Instant::now(),
                    transport: TransportContext {
                        // The demo socket only joins the multicast group, so
                        // everything it receives arrived via the group.
                        local_addr: MDNS_DEST_ADDR,
                        peer_addr: peer,
                        transport_protocol: TransportProtocol::UDP,
                    },
                    message: BytesMut::from(&buf[..len]),
                };
                let _ = responder.handle_read(msg);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
            }
            Err(err) => return Err(err),
        }

        let now = Instant::now();
        if let Some(deadline) = responder.poll_timeout() {
            if deadline <= now {
                let _ = responder.handle_timeout(now);
            }
        }
    }
}
