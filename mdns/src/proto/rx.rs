use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use rand::Rng;

use shared::error::{Error, Result};

use crate::message::name::WireName;
use crate::message::question::Question;
use crate::message::records::{read_record_header, validate_records, RecordHeader};
use crate::message::{
    DnsType, Header, RecordCounts, Section, CLASS_ANY, CLASS_INTERNET, CLASS_MASK, CLASS_QU_FLAG,
    NUM_SECTIONS,
};
use crate::proto::history::TxMessageHistory;
use crate::proto::MDNS_PORT;

const MIN_PROCESS_DELAY: Duration = Duration::from_millis(400);
const MAX_PROCESS_DELAY: Duration = Duration::from_millis(500);
const MAX_NUM_MESSAGES: usize = 10;

/// A question of a received query, with the state derived while parsing.
#[derive(Debug)]
pub(crate) struct RxQuestion {
    pub(crate) name: WireName,
    pub(crate) rr_type: u16,
    /// Is the record class Internet or Any.
    pub(crate) is_rr_class_internet: bool,
    /// Is a probe (a matching record exists in the Authority section).
    pub(crate) is_probe: bool,
    /// Is the QU flag set (requesting a unicast response).
    pub(crate) unicast_response: bool,
}

/// A validated inbound message with its parsed questions. Record sections
/// are scanned in place from the raw datagram when needed.
pub(crate) struct RxMessage {
    bytes: BytesMut,
    pub(crate) sender: SocketAddr,
    pub(crate) is_query: bool,
    pub(crate) truncated: bool,
    pub(crate) is_self_originating: bool,
    pub(crate) record_counts: RecordCounts,
    start_offsets: [usize; NUM_SECTIONS],
    pub(crate) questions: Vec<RxQuestion>,
}

impl RxMessage {
    /// Parses and validates a received datagram.
    ///
    /// Enforces RFC 6762 section 18 (standard query opcode, zero response
    /// code) and the source-port rules: legacy unicast queries (source port
    /// other than 5353) and unicast queries are not supported, responses
    /// from a non-mDNS source port are ignored.
    pub(crate) fn parse(
        bytes: BytesMut,
        sender: SocketAddr,
        is_unicast: bool,
        history: &TxMessageHistory,
    ) -> Result<RxMessage> {
        let (header, mut off) = Header::unpack(&bytes, 0)?;

        if header.opcode != 0 || header.rcode != 0 {
            return Err(Error::ErrParse);
        }

        let is_query = !header.response;

        if sender.port() != MDNS_PORT {
            if is_query {
                // Section 6.7 legacy unicast queries are not supported.
                return Err(Error::ErrNotCapable);
            }
            return Err(Error::ErrParse);
        }

        if is_unicast && is_query {
            // Direct unicast queries to port 5353 (section 5.5) are not
            // supported.
            return Err(Error::ErrNotCapable);
        }

        let record_counts = RecordCounts::read_from(&header);
        let mut start_offsets = [0usize; NUM_SECTIONS];
        let mut questions = Vec::with_capacity(record_counts.get(Section::Question) as usize);

        start_offsets[Section::Question.index()] = off;
        for _ in 0..record_counts.get(Section::Question) {
            let (question, next_off) = Question::read_from(&bytes, off)?;
            let Question { name, typ, class } = question;

            let masked_class = class & CLASS_MASK;
            questions.push(RxQuestion {
                name,
                rr_type: typ,
                is_rr_class_internet: masked_class == CLASS_INTERNET || masked_class == CLASS_ANY,
                is_probe: false,
                unicast_response: (class & CLASS_QU_FLAG) != 0,
            });
            off = next_off;
        }

        for section in [Section::Answer, Section::Authority, Section::Additional] {
            start_offsets[section.index()] = off;
            off = validate_records(&bytes, off, record_counts.get(section))?;
        }

        let is_self_originating = history.contains(&bytes);

        let mut rx = RxMessage {
            bytes,
            sender,
            is_query,
            truncated: header.truncated,
            is_self_originating,
            record_counts,
            start_offsets,
            questions,
        };

        // A question is a probe when the Authority section proposes records
        // for the question name.
        let mut probes = vec![false; rx.questions.len()];
        for (index, question) in rx.questions.iter().enumerate() {
            rx.scan_records(Section::Authority, |name, _, _| {
                if *name == question.name {
                    probes[index] = true;
                    return true;
                }
                false
            });
        }
        for (question, is_probe) in rx.questions.iter_mut().zip(probes) {
            question.is_probe = is_probe;
        }

        Ok(rx)
    }

    /// Walks the records of a section, stopping early when the visitor
    /// returns `true`. The visitor receives the owner name, the fixed record
    /// fields, and the offset of the record data.
    pub(crate) fn scan_records(
        &self,
        section: Section,
        mut visitor: impl FnMut(&WireName, &RecordHeader, usize) -> bool,
    ) {
        let msg = &self.bytes[..];
        let mut off = self.start_offsets[section.index()];

        for _ in 0..self.record_counts.get(section) {
            let Ok((name, name_end)) = WireName::read_from(msg, off) else {
                return;
            };
            let Ok((header, rdata_off)) = read_record_header(msg, name_end) else {
                return;
            };
            if visitor(&name, &header, rdata_off) {
                return;
            }
            off = rdata_off + header.rdlength as usize;
        }
    }

    pub(crate) fn rdata(&self, rdata_off: usize, rdlength: u16) -> &[u8] {
        &self.bytes[rdata_off..rdata_off + rdlength as usize]
    }

    /// Reads a (possibly compressed) name inside record data.
    pub(crate) fn read_name_at(&self, off: usize) -> Result<WireName> {
        WireName::read_from(&self.bytes, off).map(|(name, _)| name)
    }

    /// Looks for a PTR known answer under `name` whose target satisfies the
    /// visitor.
    pub(crate) fn has_ptr_known_answer(
        &self,
        name: &WireName,
        mut accept: impl FnMut(u32, &WireName) -> bool,
    ) -> bool {
        let mut found = false;
        self.scan_records(Section::Answer, |record_name, header, rdata_off| {
            if header.rr_type == DnsType::Ptr as u16 && record_name == name {
                if let Ok(target) = self.read_name_at(rdata_off) {
                    if accept(header.ttl, &target) {
                        found = true;
                        return true;
                    }
                }
            }
            false
        });
        found
    }

    /// Looks for a known answer of `rr_type` under `name` whose record data
    /// equals `rdata` and whose TTL is at least `min_ttl`.
    pub(crate) fn has_known_answer_rdata(
        &self,
        name: &WireName,
        rr_type: u16,
        rdata: &[u8],
        min_ttl: u32,
    ) -> bool {
        let mut found = false;
        self.scan_records(Section::Answer, |record_name, header, rdata_off| {
            if header.rr_type == rr_type
                && header.ttl >= min_ttl
                && record_name == name
                && self.rdata(rdata_off, header.rdlength) == rdata
            {
                found = true;
                return true;
            }
            false
        });
        found
    }

    /// Looks for a known SRV answer under `name` matching the given service
    /// parameters, comparing the target name label-wise to tolerate
    /// compression.
    pub(crate) fn has_known_srv_answer(
        &self,
        name: &WireName,
        priority: u16,
        weight: u16,
        port: u16,
        target_host: &str,
        min_ttl: u32,
    ) -> bool {
        let mut found = false;
        self.scan_records(Section::Answer, |record_name, header, rdata_off| {
            if header.rr_type != DnsType::Srv as u16
                || header.ttl < min_ttl
                || record_name != name
                || header.rdlength < 6
            {
                return false;
            }

            let fields = self.rdata(rdata_off, 6);
            let record_priority = u16::from_be_bytes([fields[0], fields[1]]);
            let record_weight = u16::from_be_bytes([fields[2], fields[3]]);
            let record_port = u16::from_be_bytes([fields[4], fields[5]]);

            if record_priority != priority || record_weight != weight || record_port != port {
                return false;
            }

            if let Ok(target) = self.read_name_at(rdata_off + 6) {
                if target.matches(None, target_host) {
                    found = true;
                    return true;
                }
            }
            false
        });
        found
    }

    /// Record data in canonical form: SRV record data is decompressed so
    /// byte-wise comparisons see the same bytes we would transmit.
    pub(crate) fn record_rdata_canonical(&self, header: &RecordHeader, rdata_off: usize) -> Vec<u8> {
        if header.rr_type == DnsType::Srv as u16 && header.rdlength >= 6 {
            let mut rdata = self.rdata(rdata_off, 6).to_vec();
            if let Ok(target) = self.read_name_at(rdata_off + 6) {
                for label in target.labels() {
                    rdata.push(label.len() as u8);
                    rdata.extend_from_slice(label.as_bytes());
                }
                rdata.push(0);
            }
            rdata
        } else {
            self.rdata(rdata_off, header.rdlength).to_vec()
        }
    }

    /// Collects the Authority records proposed for `name`, sorted by
    /// (class, type, record data) for probe tiebreaking.
    pub(crate) fn authority_records_for(&self, name: &WireName) -> Vec<(u16, u16, Vec<u8>)> {
        let mut records = Vec::new();

        self.scan_records(Section::Authority, |record_name, header, rdata_off| {
            if record_name != name {
                return false;
            }
            let rdata = self.record_rdata_canonical(header, rdata_off);
            records.push((header.class & CLASS_MASK, header.rr_type, rdata));
            false
        });

        records.sort();
        records
    }
}

/// Received messages of one multi-packet query, grouped by sender.
pub(crate) struct RxMsgGroup {
    pub(crate) messages: Vec<RxMessage>,
    pub(crate) process_time: Instant,
}

impl RxMsgGroup {
    fn sender(&self) -> SocketAddr {
        self.messages[0].sender
    }
}

/// Buffers truncated queries and their follow-on known-answer packets for
/// delayed joint processing.
#[derive(Default)]
pub(crate) struct MultiPacketRxMessages {
    groups: Vec<RxMsgGroup>,
}

impl MultiPacketRxMessages {
    /// Appends a continuation packet (no questions, only known answers) to
    /// the group from the same sender, if one exists.
    pub(crate) fn add_to_existing(&mut self, rx_message: RxMessage, now: Instant) {
        let Some(group) = self
            .groups
            .iter_mut()
            .find(|group| group.sender() == rx_message.sender)
        else {
            return;
        };

        // A follow-up that is itself truncated re-extends the delay. The
        // number of buffered messages is bounded to keep a sender from
        // piling up messages by marking every one truncated.
        if group.messages.len() >= MAX_NUM_MESSAGES {
            return;
        }

        group.process_time = if rx_message.truncated {
            now + random_process_delay()
        } else {
            now
        };
        group.messages.push(rx_message);
    }

    /// Starts a new group for a truncated query, replacing any previous
    /// group from the same sender.
    pub(crate) fn add_new(&mut self, rx_message: RxMessage, now: Instant) {
        let sender = rx_message.sender;
        self.groups.retain(|group| group.sender() != sender);

        let process_time = if rx_message.truncated {
            now + random_process_delay()
        } else {
            now
        };
        self.groups.push(RxMsgGroup {
            messages: vec![rx_message],
            process_time,
        });
    }

    /// Removes and returns the groups whose consolidation delay has elapsed.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<RxMsgGroup> {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.groups.len() {
            if self.groups[index].process_time <= now {
                due.push(self.groups.swap_remove(index));
            } else {
                index += 1;
            }
        }
        due
    }

    pub(crate) fn next_time(&self) -> Option<Instant> {
        self.groups.iter().map(|group| group.process_time).min()
    }

    pub(crate) fn clear(&mut self) {
        self.groups.clear();
    }
}

fn random_process_delay() -> Duration {
    rand::thread_rng().gen_range(MIN_PROCESS_DELAY..MAX_PROCESS_DELAY)
}
