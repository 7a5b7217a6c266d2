//! Integration tests for mdns-responder
//!
//! These tests drive responders through the sans-I/O surface without any
//! network I/O, simulating the multicast link between them.

use bytes::BytesMut;
use mdns_responder::{
    HostInfo, Responder, ResponderConfig, ResponderEvent, ServiceInfo, MDNS_DEST_ADDR,
};
use shared::error::Error;
use shared::{Protocol, TaggedBytesMut, TransportContext, TransportProtocol};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn new_responder(now: Instant) -> Responder {
    let mut responder = Responder::new(ResponderConfig::default());
    responder.set_enabled(true, now).unwrap();
    responder
}

fn multicast_rx(now: Instant, from: SocketAddr, bytes: &[u8]) -> TaggedBytesMut {
    TaggedBytesMut {
        now,
        transport: TransportContext {
            local_addr: MDNS_DEST_ADDR,
            peer_addr: from,
            transport_protocol: TransportProtocol::UDP,
        },
        message: BytesMut::from(bytes),
    }
}

/// Delivers every queued multicast packet of `from` to `to`.
fn deliver(from: &mut Responder, to: &mut Responder, from_addr: SocketAddr, now: Instant) {
    while let Some(packet) = from.poll_write() {
        if packet.transport.peer_addr == MDNS_DEST_ADDR {
            let _ = to.handle_read(multicast_rx(now, from_addr, &packet.message));
        }
    }
}

/// Steps both responders through their timers up to `until`, exchanging
/// multicast packets after every step.
fn step_both(
    a: &mut Responder,
    b: &mut Responder,
    addr_a: SocketAddr,
    addr_b: SocketAddr,
    mut now: Instant,
    until: Instant,
) -> Instant {
    for _ in 0..500 {
        deliver(a, b, addr_a, now);
        deliver(b, a, addr_b, now);

        let next = [a.poll_timeout(), b.poll_timeout()]
            .into_iter()
            .flatten()
            .min();
        let Some(next) = next else { break };
        if next > until {
            break;
        }

        now = now.max(next);
        let _ = a.handle_timeout(now);
        let _ = b.handle_timeout(now);
    }

    deliver(a, b, addr_a, now);
    deliver(b, a, addr_b, now);
    now
}

fn drain_events(responder: &mut Responder) -> Vec<ResponderEvent> {
    std::iter::from_fn(|| responder.poll_event()).collect()
}

/// Hand-built AAAA query for `name` (dot-separated, without trailing dot).
fn build_aaaa_query(name: &str) -> Vec<u8> {
    let mut msg = vec![0u8; 12];
    msg[5] = 1; // one question
    for label in name.split('.') {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&28u16.to_be_bytes()); // AAAA
    msg.extend_from_slice(&1u16.to_be_bytes()); // IN
    msg
}

#[test]
fn test_responder_answers_query() {
    let t0 = Instant::now();
    let peer: SocketAddr = "[fe80::99]:5353".parse().unwrap();

    let mut responder = new_responder(t0);
    responder
        .register_host(
            HostInfo {
                host_name: "device".to_string(),
                addresses: vec!["2001:db8::7".parse().unwrap()],
                ttl: 0,
            },
            1,
            t0,
        )
        .unwrap();

    // Drive through probing and announcing.
    let mut now = t0;
    for _ in 0..100 {
        match responder.poll_timeout() {
            Some(deadline) if deadline <= t0 + Duration::from_secs(6) => {
                now = now.max(deadline);
                responder.handle_timeout(now).unwrap();
            }
            _ => break,
        }
    }
    assert_eq!(
        drain_events(&mut responder),
        vec![ResponderEvent::Registered(1)]
    );
    while responder.poll_write().is_some() {}

    // A peer query for the host name gets a multicast response carrying the
    // advertised address.
    let query_time = now + Duration::from_secs(5);
    responder
        .handle_read(multicast_rx(query_time, peer, &build_aaaa_query("device.local")))
        .unwrap();
    if let Some(deadline) = responder.poll_timeout() {
        responder.handle_timeout(deadline.max(query_time)).unwrap();
    }

    let packet = responder.poll_write().expect("a response packet");
    assert_eq!(packet.transport.peer_addr, MDNS_DEST_ADDR);
    // QR bit set, and the advertised address is in the payload.
    assert_ne!(packet.message[2] & 0x80, 0);
    let address: std::net::Ipv6Addr = "2001:db8::7".parse().unwrap();
    let payload = packet.message.to_vec();
    assert!(payload
        .windows(16)
        .any(|window| window == address.octets()));
}

#[test]
fn test_two_responders_with_unique_names_coexist() {
    let t0 = Instant::now();
    let addr_a: SocketAddr = "[fe80::a]:5353".parse().unwrap();
    let addr_b: SocketAddr = "[fe80::b]:5353".parse().unwrap();

    let mut a = new_responder(t0);
    let mut b = new_responder(t0);

    a.register_host(
        HostInfo {
            host_name: "alpha".to_string(),
            addresses: vec!["2001:db8::a".parse().unwrap()],
            ttl: 0,
        },
        1,
        t0,
    )
    .unwrap();
    b.register_host(
        HostInfo {
            host_name: "beta".to_string(),
            addresses: vec!["2001:db8::b".parse().unwrap()],
            ttl: 0,
        },
        2,
        t0,
    )
    .unwrap();

    step_both(&mut a, &mut b, addr_a, addr_b, t0, t0 + Duration::from_secs(8));

    assert_eq!(drain_events(&mut a), vec![ResponderEvent::Registered(1)]);
    assert_eq!(drain_events(&mut b), vec![ResponderEvent::Registered(2)]);
}

#[test]
fn test_registered_name_is_defended_against_late_claimer() {
    let t0 = Instant::now();
    let addr_a: SocketAddr = "[fe80::a]:5353".parse().unwrap();
    let addr_b: SocketAddr = "[fe80::b]:5353".parse().unwrap();

    let mut a = new_responder(t0);
    let mut b = new_responder(t0);

    // A claims the name first.
    a.register_host(
        HostInfo {
            host_name: "shared".to_string(),
            addresses: vec!["2001:db8::a".parse().unwrap()],
            ttl: 0,
        },
        1,
        t0,
    )
    .unwrap();
    let now = step_both(&mut a, &mut b, addr_a, addr_b, t0, t0 + Duration::from_secs(4));
    assert_eq!(drain_events(&mut a), vec![ResponderEvent::Registered(1)]);

    // B then probes for the same name with different addresses. A defends;
    // B sees the defending response while probing and reports the conflict.
    b.register_host(
        HostInfo {
            host_name: "shared".to_string(),
            addresses: vec!["2001:db8::b".parse().unwrap()],
            ttl: 0,
        },
        2,
        now,
    )
    .unwrap();
    step_both(&mut a, &mut b, addr_a, addr_b, now, now + Duration::from_secs(4));

    let b_events = drain_events(&mut b);
    assert_eq!(
        b_events,
        vec![ResponderEvent::RegisterFailed(2, Error::ErrDuplicated)]
    );

    // A keeps the name.
    assert!(drain_events(&mut a).is_empty());
}

#[test]
fn test_service_registration_events() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(
            HostInfo {
                host_name: "myhost".to_string(),
                addresses: vec!["2001:db8::1".parse().unwrap()],
                ttl: 0,
            },
            1,
            t0,
        )
        .unwrap();
    responder
        .register_service(
            ServiceInfo {
                service_instance: "printer".to_string(),
                service_type: "_http._tcp".to_string(),
                host_name: "myhost".to_string(),
                sub_type_labels: vec![],
                txt_data: vec![],
                port: 80,
                weight: 0,
                priority: 0,
                ttl: 0,
            },
            2,
            t0,
        )
        .unwrap();

    let mut now = t0;
    for _ in 0..100 {
        match responder.poll_timeout() {
            Some(deadline) if deadline <= t0 + Duration::from_secs(6) => {
                now = now.max(deadline);
                responder.handle_timeout(now).unwrap();
            }
            _ => break,
        }
    }

    let events = drain_events(&mut responder);
    assert!(events.contains(&ResponderEvent::Registered(1)));
    assert!(events.contains(&ResponderEvent::Registered(2)));
}
