use super::*;
use crate::config::ResponderConfig;
use crate::message::name::{self, WireName};
use crate::message::packer;
use crate::message::records as wire_records;
use crate::message::{
    Header, CLASS_CACHE_FLUSH_FLAG, CLASS_INTERNET, CLASS_QU_FLAG, HEADER_LEN,
};

use bytes::BytesMut;
use shared::{Protocol, TaggedBytesMut, TransportContext, TransportProtocol};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const PEER: &str = "[fe80::1234]:5353";

const TYPE_PTR: u16 = DnsType::Ptr as u16;
const TYPE_TXT: u16 = DnsType::Txt as u16;
const TYPE_KEY: u16 = DnsType::Key as u16;
const TYPE_AAAA: u16 = DnsType::Aaaa as u16;
const TYPE_SRV: u16 = DnsType::Srv as u16;
const TYPE_NSEC: u16 = DnsType::Nsec as u16;
const TYPE_ANY: u16 = DnsType::Any as u16;

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Test helpers

fn new_responder(now: Instant) -> Responder {
    let mut responder = Responder::new(ResponderConfig::default());
    responder.set_enabled(true, now).unwrap();
    responder
}

fn host_info(name: &str, addresses: &[&str]) -> HostInfo {
    HostInfo {
        host_name: name.to_string(),
        addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
        ttl: 0,
    }
}

fn service_info(instance: &str, service_type: &str, host: &str) -> ServiceInfo {
    ServiceInfo {
        service_instance: instance.to_string(),
        service_type: service_type.to_string(),
        host_name: host.to_string(),
        sub_type_labels: Vec::new(),
        txt_data: b"\x06path=/".to_vec(),
        port: 80,
        weight: 0,
        priority: 0,
        ttl: 0,
    }
}

fn tag(now: Instant, bytes: Vec<u8>, peer: &str) -> TaggedBytesMut {
    TaggedBytesMut {
        now,
        transport: TransportContext {
            // A multicast local address marks reception via the group.
            local_addr: MDNS_DEST_ADDR,
            peer_addr: peer.parse().unwrap(),
            transport_protocol: TransportProtocol::UDP,
        },
        message: BytesMut::from(&bytes[..]),
    }
}

/// Drives the responder's timers up to (and including) `until`.
fn run_until(responder: &mut Responder, until: Instant) {
    for _ in 0..500 {
        match responder.poll_timeout() {
            Some(deadline) if deadline <= until => {
                responder.handle_timeout(deadline).unwrap();
            }
            _ => return,
        }
    }
    panic!("scheduler did not settle");
}

fn drain(responder: &mut Responder) -> Vec<TaggedBytesMut> {
    std::iter::from_fn(|| responder.poll_write()).collect()
}

fn drain_events(responder: &mut Responder) -> Vec<ResponderEvent> {
    std::iter::from_fn(|| responder.poll_event()).collect()
}

struct RawRecord {
    name: String,
    rr_type: u16,
    class: u16,
    ttl: u32,
    rdata: Vec<u8>,
}

fn aaaa_record(name: &str, address: &str, ttl: u32) -> RawRecord {
    let address: std::net::Ipv6Addr = address.parse().unwrap();
    RawRecord {
        name: name.to_string(),
        rr_type: TYPE_AAAA,
        class: CLASS_INTERNET,
        ttl,
        rdata: address.octets().to_vec(),
    }
}

fn ptr_record(name: &str, target: &str, ttl: u32) -> RawRecord {
    let mut rdata = Vec::new();
    name::append_multiple_labels(&mut rdata, target).unwrap();
    name::append_terminator(&mut rdata);
    RawRecord {
        name: name.to_string(),
        rr_type: TYPE_PTR,
        class: CLASS_INTERNET,
        ttl,
        rdata,
    }
}

fn build_message(
    response: bool,
    truncated: bool,
    questions: &[(&str, u16, u16)],
    answers: &[RawRecord],
    authority: &[RawRecord],
) -> Vec<u8> {
    let mut msg = vec![0u8; HEADER_LEN];

    for (qname, rr_type, class) in questions {
        name::append_multiple_labels(&mut msg, qname).unwrap();
        name::append_terminator(&mut msg);
        packer::pack_uint16(&mut msg, *rr_type);
        packer::pack_uint16(&mut msg, *class);
    }

    for record in answers.iter().chain(authority) {
        name::append_multiple_labels(&mut msg, &record.name).unwrap();
        name::append_terminator(&mut msg);
        let len_off = wire_records::append_record_header(
            &mut msg,
            DnsType::from(record.rr_type),
            record.class,
            record.ttl,
        );
        msg.extend_from_slice(&record.rdata);
        wire_records::patch_rdlength(&mut msg, len_off).unwrap();
    }

    let header = Header {
        response,
        authoritative: response,
        truncated,
        question_count: questions.len() as u16,
        answer_count: answers.len() as u16,
        authority_count: authority.len() as u16,
        ..Default::default()
    };
    header.write_to(&mut msg);
    msg
}

fn build_query(qname: &str, rr_type: u16) -> Vec<u8> {
    build_message(false, false, &[(qname, rr_type, CLASS_INTERNET)], &[], &[])
}

#[derive(Debug)]
struct ParsedRecord {
    name: String,
    rr_type: u16,
    class: u16,
    ttl: u32,
    rdata: Vec<u8>,
    target: Option<String>,
    nsec_types: Vec<u16>,
}

#[derive(Debug)]
struct ParsedMessage {
    header: Header,
    questions: Vec<(String, u16, u16)>,
    answers: Vec<ParsedRecord>,
    authority: Vec<ParsedRecord>,
    additional: Vec<ParsedRecord>,
}

impl ParsedMessage {
    fn records(&self) -> impl Iterator<Item = &ParsedRecord> {
        self.answers.iter().chain(&self.authority).chain(&self.additional)
    }
}

fn parse_packet(bytes: &[u8]) -> ParsedMessage {
    let (header, mut off) = Header::unpack(bytes, 0).unwrap();

    let mut questions = Vec::new();
    for _ in 0..header.question_count {
        let (qname, next) = WireName::read_from(bytes, off).unwrap();
        let (rr_type, next) = packer::unpack_uint16(bytes, next).unwrap();
        let (class, next) = packer::unpack_uint16(bytes, next).unwrap();
        questions.push((qname.to_string(), rr_type, class));
        off = next;
    }

    let mut parse_section = |off: &mut usize, count: u16| {
        let mut records = Vec::new();
        for _ in 0..count {
            let (rname, next) = WireName::read_from(bytes, *off).unwrap();
            let (record_header, rdata_off) = wire_records::read_record_header(bytes, next).unwrap();
            let rdata_end = rdata_off + record_header.rdlength as usize;

            let target = match record_header.rr_type {
                t if t == TYPE_PTR => WireName::read_from(bytes, rdata_off)
                    .ok()
                    .map(|(n, _)| n.to_string()),
                t if t == TYPE_SRV => WireName::read_from(bytes, rdata_off + 6)
                    .ok()
                    .map(|(n, _)| n.to_string()),
                _ => None,
            };

            let mut nsec_types = Vec::new();
            if record_header.rr_type == TYPE_NSEC {
                let (_, window_off) = WireName::read_from(bytes, rdata_off).unwrap();
                let octet_count = bytes[window_off + 1] as usize;
                for index in 0..octet_count {
                    let octet = bytes[window_off + 2 + index];
                    for bit in 0..8 {
                        if octet & (0x80 >> bit) != 0 {
                            nsec_types.push((index * 8 + bit) as u16);
                        }
                    }
                }
            }

            records.push(ParsedRecord {
                name: rname.to_string(),
                rr_type: record_header.rr_type,
                class: record_header.class,
                ttl: record_header.ttl,
                rdata: bytes[rdata_off..rdata_end].to_vec(),
                target,
                nsec_types,
            });
            *off = rdata_end;
        }
        records
    };

    let answers = parse_section(&mut off, header.answer_count);
    let authority = parse_section(&mut off, header.authority_count);
    let additional = parse_section(&mut off, header.additional_count);

    ParsedMessage {
        header,
        questions,
        answers,
        authority,
        additional,
    }
}

fn parse_all(packets: &[TaggedBytesMut]) -> Vec<ParsedMessage> {
    packets.iter().map(|p| parse_packet(&p.message)).collect()
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Lifecycle

#[test]
fn test_register_requires_enabled() {
    let now = Instant::now();
    let mut responder = Responder::new(ResponderConfig::default());

    let result = responder.register_host(host_info("myhost", &["2001:db8::1"]), 1, now);
    assert_eq!(result.unwrap_err(), Error::ErrInvalidState);

    let result = responder.unregister_host("myhost", now);
    assert_eq!(result.unwrap_err(), Error::ErrInvalidState);
}

#[test]
fn test_set_enabled_twice_fails() {
    let now = Instant::now();
    let mut responder = Responder::new(ResponderConfig::default());

    responder.set_enabled(true, now).unwrap();
    assert_eq!(
        responder.set_enabled(true, now).unwrap_err(),
        Error::ErrAlready
    );

    responder.set_enabled(false, now).unwrap();
    assert_eq!(
        responder.set_enabled(false, now).unwrap_err(),
        Error::ErrAlready
    );
}

#[test]
fn test_close_clears_state() {
    let now = Instant::now();
    let mut responder = new_responder(now);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, now)
        .unwrap();
    assert!(responder.poll_timeout().is_some());

    responder.close().unwrap();

    assert!(!responder.is_enabled());
    assert!(responder.poll_timeout().is_none());
    assert!(responder.poll_write().is_none());
    assert!(responder.poll_event().is_none());
    assert!(responder.handle_timeout(now).is_err());
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Probing and announcing

#[test]
fn test_host_registration_probes_then_announces() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();

    // No event until probing completes.
    assert!(responder.poll_event().is_none());

    run_until(&mut responder, t0 + Duration::from_secs(6));

    let events = drain_events(&mut responder);
    assert_eq!(events, vec![ResponderEvent::Registered(1)]);

    let packets = drain(&mut responder);
    let queries: Vec<_> = packets
        .iter()
        .filter(|p| !parse_packet(&p.message).header.response)
        .collect();
    let responses: Vec<_> = packets
        .iter()
        .filter(|p| parse_packet(&p.message).header.response)
        .collect();

    // Three probes, all within the probing window.
    assert_eq!(queries.len(), 3);
    assert!(queries[2].now - queries[0].now <= Duration::from_millis(750));
    for query in &queries {
        let parsed = parse_packet(&query.message);
        assert_eq!(parsed.questions.len(), 1);
        let (qname, rr_type, class) = &parsed.questions[0];
        assert_eq!(qname, "myhost.local.");
        assert_eq!(*rr_type, TYPE_ANY);
        assert_eq!(class & !CLASS_QU_FLAG, CLASS_INTERNET);

        // Proposed records ride in the Authority section without the
        // cache-flush bit.
        let record = parsed
            .authority
            .iter()
            .find(|r| r.rr_type == TYPE_AAAA)
            .expect("probe should carry the proposed AAAA record");
        assert_eq!(record.class, CLASS_INTERNET);
        assert_eq!(record.ttl, 120);
    }

    // Three announcements with the default TTL and the cache-flush bit.
    let mut announce_times = Vec::new();
    for response in &responses {
        let parsed = parse_packet(&response.message);
        assert!(parsed.header.authoritative);
        assert!(parsed.questions.is_empty());
        if let Some(record) = parsed
            .answers
            .iter()
            .find(|r| r.name == "myhost.local." && r.rr_type == TYPE_AAAA)
        {
            assert_eq!(record.class, CLASS_INTERNET | CLASS_CACHE_FLUSH_FLAG);
            assert_eq!(record.ttl, 120);
            assert_eq!(
                record.rdata,
                "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets()
            );
            announce_times.push(response.now);
        }
    }
    assert_eq!(announce_times.len(), 3);

    // Consecutive multicasts of the same record stay at least a second
    // apart (with the doubling announce intervals: 1 s then 2 s).
    for pair in announce_times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(900));
    }
}

#[test]
fn test_first_probe_carries_qu_bit() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(1));

    let packets = drain(&mut responder);
    let probes: Vec<ParsedMessage> = parse_all(&packets)
        .into_iter()
        .filter(|p| !p.header.response)
        .collect();
    assert_eq!(probes.len(), 3);

    assert_ne!(probes[0].questions[0].2 & CLASS_QU_FLAG, 0);
    assert_eq!(probes[1].questions[0].2 & CLASS_QU_FLAG, 0);
    assert_eq!(probes[2].questions[0].2 & CLASS_QU_FLAG, 0);
}

#[test]
fn test_question_unicast_disallowed() {
    let t0 = Instant::now();
    let mut responder = Responder::new(
        ResponderConfig::default().with_question_unicast_allowed(false),
    );
    responder.set_enabled(true, t0).unwrap();

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(1));

    let packets = drain(&mut responder);
    for parsed in parse_all(&packets).iter().filter(|p| !p.header.response) {
        assert_eq!(parsed.questions[0].2 & CLASS_QU_FLAG, 0);
    }
}

#[test]
fn test_unregister_while_probing_is_silent() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    responder.unregister_host("myhost", t0).unwrap();

    run_until(&mut responder, t0 + Duration::from_secs(2));

    // No probes, no goodbyes, and the pending registration event is never
    // resolved.
    assert!(drain(&mut responder).is_empty());
    assert!(drain_events(&mut responder).is_empty());
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Probe conflicts

#[test]
fn test_probe_tiebreak_lost_holds_probing() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_millis(30));
    drain(&mut responder);

    // Peer probes for the same name with lexicographically greater record
    // data, so the local entry loses and holds off for one second.
    let inject_time = t0 + Duration::from_millis(50);
    let probe = build_message(
        false,
        false,
        &[("myhost.local", TYPE_ANY, CLASS_INTERNET)],
        &[],
        &[aaaa_record("myhost.local", "2001:db8::2", 120)],
    );
    responder.handle_read(tag(inject_time, probe, PEER)).unwrap();

    let deadline = responder.poll_timeout().unwrap();
    assert!(deadline >= inject_time + Duration::from_millis(900));

    // Probing then restarts and completes.
    run_until(&mut responder, inject_time + Duration::from_secs(3));
    let events = drain_events(&mut responder);
    assert_eq!(events, vec![ResponderEvent::Registered(1)]);

    let packets = drain(&mut responder);
    let probes = parse_all(&packets)
        .iter()
        .filter(|p| !p.header.response)
        .count();
    assert_eq!(probes, 3);
}

#[test]
fn test_probe_tiebreak_won_ignores_peer() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_millis(30));

    // Peer's proposed record data is lexicographically smaller: local wins.
    let inject_time = t0 + Duration::from_millis(50);
    let probe = build_message(
        false,
        false,
        &[("myhost.local", TYPE_ANY, CLASS_INTERNET)],
        &[],
        &[aaaa_record("myhost.local", "2001:db8::", 120)],
    );
    responder.handle_read(tag(inject_time, probe, PEER)).unwrap();

    run_until(&mut responder, t0 + Duration::from_secs(1));
    let events = drain_events(&mut responder);
    assert_eq!(events, vec![ResponderEvent::Registered(1)]);
}

#[test]
fn test_conflict_during_probing_reports_duplicated() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();

    // A response claiming the name with different record data arrives while
    // the local entry is still probing.
    let response = build_message(
        true,
        false,
        &[],
        &[aaaa_record("myhost.local", "2001:db8::9", 120)],
        &[],
    );
    responder
        .handle_read(tag(t0 + Duration::from_millis(10), response, PEER))
        .unwrap();

    let events = drain_events(&mut responder);
    assert_eq!(
        events,
        vec![ResponderEvent::RegisterFailed(1, Error::ErrDuplicated)]
    );

    // The entry is freed; the name can be registered afresh.
    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 2, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(1));
    assert_eq!(
        drain_events(&mut responder),
        vec![ResponderEvent::Registered(2)]
    );
}

#[test]
fn test_conflict_after_registration_emits_event() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(6));
    drain(&mut responder);
    drain_events(&mut responder);

    let inject_time = t0 + Duration::from_secs(10);
    let response = build_message(
        true,
        false,
        &[],
        &[aaaa_record("myhost.local", "2001:db8::9", 120)],
        &[],
    );
    responder
        .handle_read(tag(inject_time, response, PEER))
        .unwrap();

    assert_eq!(
        drain_events(&mut responder),
        vec![ResponderEvent::Conflict("myhost".to_string(), None)]
    );

    // The entry no longer answers queries.
    responder
        .handle_read(tag(inject_time, build_query("myhost.local", TYPE_AAAA), PEER))
        .unwrap();
    run_until(&mut responder, inject_time + Duration::from_secs(1));
    assert!(drain(&mut responder).is_empty());
}

#[test]
fn test_service_conflict_after_registration() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);
    drain(&mut responder);
    drain_events(&mut responder);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    // A response claiming the service instance name with different record
    // data: the registered entry loses the name.
    let response = build_message(
        true,
        false,
        &[],
        &[RawRecord {
            name: "printer._http._tcp.local".to_string(),
            rr_type: TYPE_TXT,
            class: CLASS_INTERNET,
            ttl: 120,
            rdata: b"\x05other".to_vec(),
        }],
        &[],
    );
    responder.handle_read(tag(t1, response, PEER)).unwrap();

    assert_eq!(
        drain_events(&mut responder),
        vec![ResponderEvent::Conflict(
            "printer".to_string(),
            Some("_http._tcp".to_string())
        )]
    );

    // The service type's entry count dropped to zero: its meta PTR is
    // retired with a goodbye.
    run_until(&mut responder, t1 + Duration::from_secs(1));
    let packets = drain(&mut responder);
    let parsed = parse_all(&packets);
    let meta_goodbye = parsed
        .iter()
        .flat_map(|p| p.answers.iter())
        .find(|r| r.rr_type == TYPE_PTR && r.name == "_services._dns-sd._udp.local.")
        .expect("meta PTR goodbye");
    assert_eq!(meta_goodbye.ttl, 0);
    assert_eq!(meta_goodbye.target.as_deref(), Some("_http._tcp.local."));

    // The conflicted entry answers neither service type nor meta queries.
    let t2 = t1 + Duration::from_secs(2);
    responder
        .handle_read(tag(t2, build_query("_http._tcp.local", TYPE_PTR), PEER))
        .unwrap();
    responder
        .handle_read(tag(
            t2,
            build_query("_services._dns-sd._udp.local", TYPE_PTR),
            PEER,
        ))
        .unwrap();
    run_until(&mut responder, t2 + Duration::from_secs(1));
    assert!(drain(&mut responder).is_empty());
}

#[test]
fn test_self_loop_suppression() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(6));
    drain_events(&mut responder);

    let packets = drain(&mut responder);
    let announce = packets
        .iter()
        .find(|p| parse_packet(&p.message).header.response)
        .expect("announce packet");

    // The exact bytes we transmitted come back within the 10 s history
    // window: recognized as self-originating and discarded, so the NSEC
    // record they carry does not trigger conflict handling.
    let looped = announce.message.to_vec();
    responder
        .handle_read(tag(t0 + Duration::from_secs(5), looped, PEER))
        .unwrap();
    assert!(drain_events(&mut responder).is_empty());

    // A modified copy is not ours: its differing record data for our name
    // is a conflict.
    let mut altered = announce.message.to_vec();
    let last = altered.len() - 1;
    altered[last] ^= 0xff;
    responder
        .handle_read(tag(t0 + Duration::from_secs(5), altered, PEER))
        .unwrap();
    assert_eq!(
        drain_events(&mut responder),
        vec![ResponderEvent::Conflict("myhost".to_string(), None)]
    );
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Services

fn registered_printer(t0: Instant) -> Responder {
    let mut responder = new_responder(t0);
    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    responder
        .register_service(service_info("printer", "_http._tcp", "myhost"), 2, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(6));
    responder
}

#[test]
fn test_service_registration_announces_all_records() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);

    let events = drain_events(&mut responder);
    assert!(events.contains(&ResponderEvent::Registered(1)));
    assert!(events.contains(&ResponderEvent::Registered(2)));

    let packets = drain(&mut responder);
    let parsed = parse_all(&packets);
    let records: Vec<&ParsedRecord> = parsed
        .iter()
        .filter(|p| p.header.response)
        .flat_map(|p| p.answers.iter().chain(&p.additional))
        .collect();

    let ptr = records
        .iter()
        .find(|r| r.rr_type == TYPE_PTR && r.name == "_http._tcp.local.")
        .expect("base PTR record");
    assert_eq!(ptr.target.as_deref(), Some("printer._http._tcp.local."));
    assert_eq!(ptr.ttl, 120);
    // PTR is a shared record: no cache-flush bit.
    assert_eq!(ptr.class, CLASS_INTERNET);

    let srv = records
        .iter()
        .find(|r| r.rr_type == TYPE_SRV && r.name == "printer._http._tcp.local.")
        .expect("SRV record");
    assert_eq!(srv.class, CLASS_INTERNET | CLASS_CACHE_FLUSH_FLAG);
    assert_eq!(srv.target.as_deref(), Some("myhost.local."));
    assert_eq!(u16::from_be_bytes([srv.rdata[4], srv.rdata[5]]), 80);

    let txt = records
        .iter()
        .find(|r| r.rr_type == TYPE_TXT && r.name == "printer._http._tcp.local.")
        .expect("TXT record");
    assert_eq!(txt.rdata, b"\x06path=/".to_vec());

    let meta = records
        .iter()
        .find(|r| r.rr_type == TYPE_PTR && r.name == "_services._dns-sd._udp.local.")
        .expect("meta PTR record");
    assert_eq!(meta.target.as_deref(), Some("_http._tcp.local."));
    assert_eq!(meta.ttl, 4500);
}

#[test]
fn test_service_query_answered_with_additional_data() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);
    drain(&mut responder);
    drain_events(&mut responder);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .handle_read(tag(t1, build_query("_http._tcp.local", TYPE_PTR), PEER))
        .unwrap();
    run_until(&mut responder, t1 + Duration::from_secs(1));

    let packets = drain(&mut responder);
    assert!(!packets.is_empty());
    let parsed = parse_packet(&packets[0].message);

    let ptr = parsed
        .answers
        .iter()
        .find(|r| r.rr_type == TYPE_PTR)
        .expect("PTR answer");
    assert_eq!(ptr.name, "_http._tcp.local.");

    // RFC 6763 section 12: SRV, TXT, and the host addresses ride along in
    // Additional Data.
    assert!(parsed.additional.iter().any(|r| r.rr_type == TYPE_SRV));
    assert!(parsed.additional.iter().any(|r| r.rr_type == TYPE_TXT));
    assert!(parsed.additional.iter().any(|r| r.rr_type == TYPE_AAAA));
}

#[test]
fn test_known_answer_suppression() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);
    drain(&mut responder);
    drain_events(&mut responder);

    // Known answer with TTL at least half of ours (120): suppressed.
    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    let query = build_message(
        false,
        false,
        &[("_http._tcp.local", TYPE_PTR, CLASS_INTERNET)],
        &[ptr_record("_http._tcp.local", "printer._http._tcp.local", 61)],
        &[],
    );
    responder.handle_read(tag(t1, query, PEER)).unwrap();
    run_until(&mut responder, t1 + Duration::from_secs(1));
    assert!(drain(&mut responder).is_empty());

    // Known answer with a low TTL does not suppress.
    let t2 = t1 + Duration::from_secs(2);
    let query = build_message(
        false,
        false,
        &[("_http._tcp.local", TYPE_PTR, CLASS_INTERNET)],
        &[ptr_record("_http._tcp.local", "printer._http._tcp.local", 20)],
        &[],
    );
    responder.handle_read(tag(t2, query, PEER)).unwrap();
    run_until(&mut responder, t2 + Duration::from_secs(1));

    let packets = drain(&mut responder);
    assert!(parse_all(&packets)
        .iter()
        .flat_map(|p| p.answers.iter())
        .any(|r| r.rr_type == TYPE_PTR && r.name == "_http._tcp.local."));
}

#[test]
fn test_service_subtype_query() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    let mut info = service_info("printer", "_http._tcp", "myhost");
    info.sub_type_labels = vec!["_color".to_string()];
    responder.register_service(info, 2, t0).unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(6));
    drain(&mut responder);
    drain_events(&mut responder);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .handle_read(tag(
            t1,
            build_query("_color._sub._http._tcp.local", TYPE_PTR),
            PEER,
        ))
        .unwrap();
    run_until(&mut responder, t1 + Duration::from_secs(1));

    let packets = drain(&mut responder);
    let parsed = parse_all(&packets);
    let sub_ptr = parsed
        .iter()
        .flat_map(|p| p.answers.iter())
        .find(|r| r.rr_type == TYPE_PTR && r.name == "_color._sub._http._tcp.local.")
        .expect("sub-type PTR answer");
    assert_eq!(sub_ptr.target.as_deref(), Some("printer._http._tcp.local."));
}

#[test]
fn test_services_meta_query() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);
    drain(&mut responder);
    drain_events(&mut responder);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .handle_read(tag(
            t1,
            build_query("_services._dns-sd._udp.local", TYPE_PTR),
            PEER,
        ))
        .unwrap();
    run_until(&mut responder, t1 + Duration::from_secs(1));

    let packets = drain(&mut responder);
    let parsed = parse_all(&packets);
    let meta = parsed
        .iter()
        .flat_map(|p| p.answers.iter())
        .find(|r| r.name == "_services._dns-sd._udp.local.")
        .expect("meta PTR answer");
    assert_eq!(meta.rr_type, TYPE_PTR);
    assert_eq!(meta.ttl, 4500);
    assert_eq!(meta.target.as_deref(), Some("_http._tcp.local."));
}

#[test]
fn test_unregister_service_sends_goodbye() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);
    drain(&mut responder);
    drain_events(&mut responder);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .unregister_service("printer", "_http._tcp", t1)
        .unwrap();
    run_until(&mut responder, t1 + Duration::from_secs(2));

    let packets = drain(&mut responder);
    let parsed = parse_all(&packets);
    let goodbyes: Vec<&ParsedRecord> = parsed
        .iter()
        .flat_map(|p| p.answers.iter())
        .filter(|r| r.ttl == 0)
        .collect();

    assert!(goodbyes
        .iter()
        .any(|r| r.rr_type == TYPE_PTR && r.name == "_http._tcp.local."));
    assert!(goodbyes
        .iter()
        .any(|r| r.rr_type == TYPE_SRV && r.name == "printer._http._tcp.local."));
    assert!(goodbyes
        .iter()
        .any(|r| r.rr_type == TYPE_TXT && r.name == "printer._http._tcp.local."));
    // The service type's entry count dropped to zero: its meta PTR is
    // retired too.
    assert!(goodbyes
        .iter()
        .any(|r| r.rr_type == TYPE_PTR && r.name == "_services._dns-sd._udp.local."));

    // A goodbye is a single shot per record.
    let ptr_goodbyes = goodbyes
        .iter()
        .filter(|r| r.rr_type == TYPE_PTR && r.name == "_http._tcp.local.")
        .count();
    assert_eq!(ptr_goodbyes, 1);

    // The retired service no longer answers.
    let t2 = t1 + Duration::from_secs(3);
    responder
        .handle_read(tag(t2, build_query("_http._tcp.local", TYPE_PTR), PEER))
        .unwrap();
    run_until(&mut responder, t2 + Duration::from_secs(1));
    assert!(drain(&mut responder).is_empty());
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Query answering

fn registered_host(t0: Instant) -> Responder {
    let mut responder = new_responder(t0);
    responder
        .register_host(host_info("myhost", &["2001:db8::1"]), 1, t0)
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(6));
    drain(&mut responder);
    drain_events(&mut responder);
    responder
}

#[test]
fn test_aaaa_query_answered_on_multicast() {
    let t0 = Instant::now();
    let mut responder = registered_host(t0);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .handle_read(tag(t1, build_query("myhost.local", TYPE_AAAA), PEER))
        .unwrap();
    run_until(&mut responder, t1 + Duration::from_millis(200));

    let packets = drain(&mut responder);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].transport.peer_addr, MDNS_DEST_ADDR);

    let parsed = parse_packet(&packets[0].message);
    assert!(parsed.header.response);
    assert!(parsed.header.authoritative);
    // Responses carry no questions (RFC 6762 section 6).
    assert!(parsed.questions.is_empty());
    let record = parsed
        .answers
        .iter()
        .find(|r| r.rr_type == TYPE_AAAA)
        .expect("AAAA answer");
    assert_eq!(record.name, "myhost.local.");

    // A second query right after the answer is absorbed by the multicast
    // rate limit: the same record is not multicast twice within a second.
    let t2 = t1 + Duration::from_millis(200);
    responder
        .handle_read(tag(t2, build_query("myhost.local", TYPE_AAAA), PEER))
        .unwrap();
    run_until(&mut responder, t2 + Duration::from_millis(700));
    assert!(drain(&mut responder).is_empty());
}

#[test]
fn test_qu_query_answered_unicast_when_recently_multicast() {
    let t0 = Instant::now();
    let mut responder = registered_host(t0);

    // The AAAA record was multicast during announcing, well within a
    // quarter of its TTL (30 s): a QU question gets a unicast answer,
    // immediately.
    let t1 = t0 + Duration::from_secs(6);
    responder
        .handle_read(tag(
            t1,
            build_message(
                false,
                false,
                &[("myhost.local", TYPE_AAAA, CLASS_INTERNET | CLASS_QU_FLAG)],
                &[],
                &[],
            ),
            PEER,
        ))
        .unwrap();

    let packets = drain(&mut responder);
    assert_eq!(packets.len(), 1);
    assert_eq!(
        packets[0].transport.peer_addr,
        PEER.parse::<SocketAddr>().unwrap()
    );
    let parsed = parse_packet(&packets[0].message);
    assert!(parsed.answers.iter().any(|r| r.rr_type == TYPE_AAAA));

    // Once the last multicast is older than a quarter of the TTL, the
    // answer is shared on multicast instead.
    let t2 = t0 + Duration::from_secs(40);
    run_until(&mut responder, t2);
    drain(&mut responder);

    responder
        .handle_read(tag(
            t2,
            build_message(
                false,
                false,
                &[("myhost.local", TYPE_AAAA, CLASS_INTERNET | CLASS_QU_FLAG)],
                &[],
                &[],
            ),
            PEER,
        ))
        .unwrap();
    assert!(drain(&mut responder).is_empty());

    run_until(&mut responder, t2 + Duration::from_millis(200));
    let packets = drain(&mut responder);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].transport.peer_addr, MDNS_DEST_ADDR);
}

#[test]
fn test_nsec_answer_for_missing_type() {
    let t0 = Instant::now();
    let mut responder = registered_host(t0);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .handle_read(tag(t1, build_query("myhost.local", TYPE_TXT), PEER))
        .unwrap();
    run_until(&mut responder, t1 + Duration::from_millis(200));

    let packets = drain(&mut responder);
    assert_eq!(packets.len(), 1);
    let parsed = parse_packet(&packets[0].message);

    assert!(parsed.records().all(|r| r.rr_type != TYPE_TXT));

    let nsec = parsed
        .answers
        .iter()
        .find(|r| r.rr_type == TYPE_NSEC)
        .expect("standalone NSEC answer");
    assert_eq!(nsec.name, "myhost.local.");
    assert_eq!(nsec.ttl, 4500);
    assert_eq!(nsec.class, CLASS_INTERNET | CLASS_CACHE_FLUSH_FLAG);
    assert!(nsec.nsec_types.contains(&TYPE_AAAA));
    assert!(!nsec.nsec_types.contains(&TYPE_TXT));
}

#[test]
fn test_key_registration_and_answer() {
    let t0 = Instant::now();
    let mut responder = new_responder(t0);

    responder
        .register_key(
            KeyInfo {
                name: "mykey".to_string(),
                service_type: None,
                key_data: vec![1, 2, 3],
                ttl: 0,
            },
            7,
            t0,
        )
        .unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(6));

    assert_eq!(
        drain_events(&mut responder),
        vec![ResponderEvent::Registered(7)]
    );
    drain(&mut responder);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .handle_read(tag(t1, build_query("mykey.local", TYPE_KEY), PEER))
        .unwrap();
    run_until(&mut responder, t1 + Duration::from_millis(200));

    let packets = drain(&mut responder);
    let parsed = parse_all(&packets);
    let key = parsed
        .iter()
        .flat_map(|p| p.answers.iter())
        .find(|r| r.rr_type == TYPE_KEY)
        .expect("KEY answer");
    assert_eq!(key.name, "mykey.local.");
    assert_eq!(key.rdata, vec![1, 2, 3]);
    assert_eq!(key.class, CLASS_INTERNET | CLASS_CACHE_FLUSH_FLAG);
}

#[test]
fn test_reregister_updates_without_reprobing() {
    let t0 = Instant::now();
    let mut responder = registered_host(t0);

    let t1 = t0 + Duration::from_secs(10);
    run_until(&mut responder, t1);
    drain(&mut responder);

    responder
        .register_host(host_info("myhost", &["2001:db8::1", "2001:db8::2"]), 9, t1)
        .unwrap();

    // The name is unchanged: registration succeeds immediately.
    assert_eq!(
        drain_events(&mut responder),
        vec![ResponderEvent::Registered(9)]
    );

    run_until(&mut responder, t1 + Duration::from_secs(5));
    let packets = drain(&mut responder);
    let parsed = parse_all(&packets);

    // No re-probing, only announcements of the updated record set.
    assert!(parsed.iter().all(|p| p.header.response));
    let aaaa_count = parsed
        .iter()
        .flat_map(|p| p.answers.iter())
        .filter(|r| r.rr_type == TYPE_AAAA)
        .count();
    // Two addresses, announced three times.
    assert_eq!(aaaa_count, 6);
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Multi-packet queries

#[test]
fn test_multipacket_known_answer_consolidation() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);
    drain(&mut responder);
    drain_events(&mut responder);

    let t1 = t0 + Duration::from_secs(20);
    run_until(&mut responder, t1);
    drain(&mut responder);

    // A truncated query: the response is deferred, waiting for follow-up
    // known-answer packets from the same sender.
    let query = build_message(
        false,
        true,
        &[("_http._tcp.local", TYPE_PTR, CLASS_INTERNET)],
        &[],
        &[],
    );
    responder.handle_read(tag(t1, query, PEER)).unwrap();
    assert!(drain(&mut responder).is_empty());

    let deadline = responder.poll_timeout().unwrap();
    assert!(deadline >= t1 + Duration::from_millis(350));
    assert!(deadline <= t1 + Duration::from_millis(550));

    // The continuation packet carries the answer we were about to give:
    // suppressed.
    let continuation = build_message(
        false,
        false,
        &[],
        &[ptr_record("_http._tcp.local", "printer._http._tcp.local", 100)],
        &[],
    );
    responder
        .handle_read(tag(t1 + Duration::from_millis(100), continuation, PEER))
        .unwrap();

    run_until(&mut responder, t1 + Duration::from_secs(2));
    assert!(drain(&mut responder).is_empty());
}

#[test]
fn test_multipacket_without_continuation_is_answered() {
    let t0 = Instant::now();
    let mut responder = registered_printer(t0);
    drain(&mut responder);
    drain_events(&mut responder);

    let t1 = t0 + Duration::from_secs(20);
    run_until(&mut responder, t1);
    drain(&mut responder);

    let query = build_message(
        false,
        true,
        &[("_http._tcp.local", TYPE_PTR, CLASS_INTERNET)],
        &[],
        &[],
    );
    responder.handle_read(tag(t1, query, PEER)).unwrap();

    run_until(&mut responder, t1 + Duration::from_secs(2));
    let packets = drain(&mut responder);
    assert!(parse_all(&packets)
        .iter()
        .flat_map(|p| p.answers.iter())
        .any(|r| r.rr_type == TYPE_PTR && r.name == "_http._tcp.local."));
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
// Message size limit

#[test]
fn test_message_size_limit_splits_probes() {
    let t0 = Instant::now();
    let mut responder = Responder::new(ResponderConfig::default().with_max_message_size(80));
    responder.set_enabled(true, t0).unwrap();

    responder
        .register_host(host_info("host-one", &["2001:db8::1"]), 1, t0)
        .unwrap();
    responder
        .register_host(host_info("host-two", &["2001:db8::2"]), 2, t0)
        .unwrap();
    responder
        .register_host(host_info("host-three", &["2001:db8::3"]), 3, t0)
        .unwrap();

    // Drive whole sweeps past every entry's fire time so the three probes
    // coalesce into one logical message per round, which then exceeds the
    // size threshold and splits.
    responder.handle_timeout(t0 + Duration::from_millis(25)).unwrap();
    responder.handle_timeout(t0 + Duration::from_millis(300)).unwrap();
    responder.handle_timeout(t0 + Duration::from_millis(575)).unwrap();

    let packets = drain(&mut responder);
    let probes: Vec<ParsedMessage> = parse_all(&packets)
        .into_iter()
        .filter(|p| !p.header.response)
        .collect();

    // Every entry still probes three times, split across more packets.
    for host_name in ["host-one.local.", "host-two.local.", "host-three.local."] {
        let count = probes
            .iter()
            .flat_map(|p| p.questions.iter())
            .filter(|(qname, _, _)| qname == host_name)
            .count();
        assert_eq!(count, 3, "probe count for {host_name}");
    }

    // Flushed probe packets carry the Truncated bit; the final packet of a
    // sweep does not.
    assert!(probes.iter().any(|p| p.header.truncated));
    assert!(probes.iter().any(|p| !p.header.truncated));
}

#[test]
fn test_message_size_limit_splits_responses() {
    let t0 = Instant::now();
    let mut responder = Responder::new(ResponderConfig::default().with_max_message_size(80));
    responder.set_enabled(true, t0).unwrap();

    responder
        .register_host(host_info("host-one", &["2001:db8::1"]), 1, t0)
        .unwrap();
    responder
        .register_host(host_info("host-two", &["2001:db8::2"]), 2, t0)
        .unwrap();

    // Whole-sweep timeouts keep both entries on the same announce schedule,
    // so every announce round builds one logical response that must split.
    responder.handle_timeout(t0 + Duration::from_millis(25)).unwrap();
    responder.handle_timeout(t0 + Duration::from_millis(300)).unwrap();
    responder.handle_timeout(t0 + Duration::from_millis(575)).unwrap();
    responder.handle_timeout(t0 + Duration::from_millis(850)).unwrap();
    run_until(&mut responder, t0 + Duration::from_secs(6));

    let packets = drain(&mut responder);
    let responses: Vec<ParsedMessage> = parse_all(&packets)
        .into_iter()
        .filter(|p| p.header.response)
        .collect();
    assert!(!responses.is_empty());

    // Responses split into independent messages, never truncated.
    for response in &responses {
        assert!(!response.header.truncated);
    }
    for host_name in ["host-one.local.", "host-two.local."] {
        let count = responses
            .iter()
            .flat_map(|p| p.answers.iter())
            .filter(|r| r.rr_type == TYPE_AAAA && r.name == host_name)
            .count();
        assert_eq!(count, 3, "announce count for {host_name}");
    }
}
