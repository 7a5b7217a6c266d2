use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::time::Instant;

use crate::message::name::WireName;
use crate::message::records::TypeBitmap;
use crate::message::{class_for, DnsType, Section, CLASS_INTERNET};
use crate::proto::entry::{answer_non_probe, answer_probe, EntryCore, EntryState};
use crate::proto::record::{AnswerInfo, RecordInfo};
use crate::proto::tx::{AppendOutcome, TxMessage, UNSPECIFIED_OFFSET};
use crate::proto::{HostInfo, RequestId, ResponderEvent, DEFAULT_TTL};

/// A registered host name with its AAAA record set and optional KEY record.
pub(crate) struct HostEntry {
    pub(crate) core: EntryCore,
    pub(crate) name: String,
    pub(crate) addr_record: RecordInfo,
    pub(crate) addresses: Vec<Ipv6Addr>,
    pub(crate) name_offset: u16,
}

impl HostEntry {
    pub(crate) fn new(name: &str, now: Instant) -> Self {
        Self {
            core: EntryCore::new(now),
            name: name.to_string(),
            addr_record: RecordInfo::new(),
            addresses: Vec::new(),
            name_offset: UNSPECIFIED_OFFSET,
        }
    }

    pub(crate) fn matches_name(&self, name: &WireName) -> bool {
        name.matches(None, &self.name)
    }

    pub(crate) fn matches_host_name(&self, host_name: &str) -> bool {
        self.name.eq_ignore_ascii_case(host_name)
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.addr_record.is_present() && !self.core.key_record.is_present()
    }

    pub(crate) fn register(
        &mut self,
        host: &HostInfo,
        request_id: RequestId,
        events: &mut VecDeque<ResponderEvent>,
        now: Instant,
    ) {
        if self.core.state() == EntryState::Removing {
            self.core.start_probing(now);
        }

        self.core.set_callback(request_id, events);

        if host.addresses.is_empty() {
            // A host registered with no addresses stops advertising: announce
            // removal of the old addresses.
            self.unregister(now);
            return;
        }

        self.addr_record
            .update_ttl(super::determine_ttl(host.ttl, DEFAULT_TTL), now);
        self.addr_record
            .update_addresses(&mut self.addresses, &host.addresses, now);

        self.determine_next_fire_time(now);
    }

    pub(crate) fn unregister(&mut self, now: Instant) {
        if !self.addr_record.is_present() {
            return;
        }

        self.core.clear_callback();

        match self.core.state() {
            EntryState::Registered => {
                self.addr_record.update_ttl(0, now);
                self.determine_next_fire_time(now);
            }
            EntryState::Probing | EntryState::Conflict => {
                self.clear_host();
                self.schedule_to_remove_if_empty();
            }
            EntryState::Removing => {}
        }
    }

    fn clear_host(&mut self) {
        self.addr_record.clear();
        self.addresses.clear();
    }

    pub(crate) fn schedule_to_remove_if_empty(&mut self) {
        if self.is_empty() {
            self.core.set_state_to_removing();
        }
    }

    pub(crate) fn answer_question(
        &mut self,
        info: &AnswerInfo,
        suppress_addr: bool,
        suppress_key: bool,
        now: Instant,
    ) {
        if !self.core.is_registered() {
            return;
        }

        let schedule_nsec = {
            let mut records = [
                (&mut self.addr_record, DnsType::Aaaa, suppress_addr),
                (&mut self.core.key_record, DnsType::Key, suppress_key),
            ];
            if info.is_probe {
                answer_probe(info, &mut records, now);
                false
            } else {
                answer_non_probe(info, &mut records)
            }
        };

        if schedule_nsec {
            self.core.schedule_nsec_answer(info);
        }

        self.determine_next_fire_time(now);
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.core.clear_append_state();
        self.addr_record.mark_as_not_appended();
        self.name_offset = UNSPECIFIED_OFFSET;
    }

    pub(crate) fn prepare_probe_records(&mut self, tx: &mut TxMessage, qu_allowed: bool, now: Instant) {
        self.append_name_to(tx, Section::Question);
        self.core.append_question_fields(tx, qu_allowed);

        self.append_address_records_to(tx, Section::Authority, now);
        self.append_key_record_to(tx, Section::Authority, now);
    }

    pub(crate) fn start_announcing(&mut self, now: Instant) {
        self.addr_record.start_announcing(now);
        self.core.key_record.start_announcing(now);
    }

    pub(crate) fn prepare_response_records(&mut self, tx: &mut TxMessage, now: Instant) {
        let response_type = tx.get_type();
        let mut append_nsec = false;

        if self.addr_record.should_append_to(response_type, now) {
            self.append_address_records_to(tx, Section::Answer, now);
            append_nsec = true;
        }

        if self.core.key_record.should_append_to(response_type, now) {
            self.append_key_record_to(tx, Section::Answer, now);
            append_nsec = true;
        }

        if append_nsec || self.core.should_answer_nsec(response_type, now) {
            // NSEC rides in Additional Data next to an answer for the name,
            // or stands alone in the Answer section otherwise.
            let section = if append_nsec {
                Section::Additional
            } else {
                Section::Answer
            };
            self.append_nsec_record_to(tx, section);
        }
    }

    pub(crate) fn update_records_state(
        &mut self,
        response_type: crate::proto::tx::TxMessageType,
        now: Instant,
    ) {
        self.core.update_records_state(response_type, now);
        self.addr_record.update_state_after_answer(response_type, now);

        if self.is_empty() {
            self.core.set_state_to_removing();
        }
    }

    pub(crate) fn determine_next_fire_time(&mut self, now: Instant) {
        if !self.core.is_registered() {
            return;
        }

        self.core.determine_next_fire_time(now);
        let mut fire_time = self.core.fire_time;
        self.addr_record.update_fire_time(&mut fire_time, now);
        self.core.fire_time = fire_time;
    }

    pub(crate) fn append_address_records_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        now: Instant,
    ) {
        if !self.addr_record.can_append() {
            return;
        }
        self.addr_record.mark_as_appended(tx.get_type(), section, now);

        for index in 0..self.addresses.len() {
            let address = self.addresses[index];

            self.append_name_to(tx, section);
            let len_off = tx.append_record_header(
                section,
                DnsType::Aaaa,
                class_for(section, true),
                self.addr_record.ttl(),
            );
            tx.append_rdata(section, &address.octets());
            tx.patch_rdlength(section, len_off);

            tx.increment_record_count(section);
        }
    }

    pub(crate) fn append_key_record_to(&mut self, tx: &mut TxMessage, section: Section, now: Instant) {
        let name = &self.name;
        let name_offset = &mut self.name_offset;
        self.core
            .append_key_record_to(tx, section, now, |tx, section| {
                append_host_name(tx, section, name, name_offset);
            });
    }

    fn append_nsec_record_to(&mut self, tx: &mut TxMessage, section: Section) {
        let mut types = TypeBitmap::new();

        if self.addr_record.is_present() && self.addr_record.ttl() > 0 {
            types.add_type(DnsType::Aaaa as u16);
        }
        if self.core.key_record.is_present() && self.core.key_record.ttl() > 0 {
            types.add_type(DnsType::Key as u16);
        }

        if types.is_empty() {
            return;
        }

        let name = &self.name;
        let name_offset = &mut self.name_offset;
        self.core
            .append_nsec_record_to(tx, section, &types, |tx, section| {
                append_host_name(tx, section, name, name_offset);
            });
    }

    pub(crate) fn append_name_to(&mut self, tx: &mut TxMessage, section: Section) {
        append_host_name(tx, section, &self.name, &mut self.name_offset);
    }

    /// Records proposed by this entry for probe tiebreaking, sorted by
    /// (class, type, record data).
    pub(crate) fn tiebreak_records(&self) -> Vec<(u16, u16, Vec<u8>)> {
        let mut records = Vec::new();

        if self.addr_record.can_answer() {
            for address in &self.addresses {
                records.push((
                    CLASS_INTERNET,
                    DnsType::Aaaa as u16,
                    address.octets().to_vec(),
                ));
            }
        }
        if self.core.key_record.can_answer() {
            records.push((
                CLASS_INTERNET,
                DnsType::Key as u16,
                self.core.key_data.clone(),
            ));
        }

        records.sort();
        records
    }

    /// Record data of every record this entry publishes under its name,
    /// used to tell apart our own records from conflicting ones.
    pub(crate) fn record_data_set(&self) -> Vec<(u16, Vec<u8>)> {
        let mut set = Vec::new();
        if self.addr_record.is_present() {
            for address in &self.addresses {
                set.push((DnsType::Aaaa as u16, address.octets().to_vec()));
            }
        }
        if self.core.key_record.is_present() {
            set.push((DnsType::Key as u16, self.core.key_data.clone()));
        }
        set
    }
}

pub(crate) fn append_host_name(tx: &mut TxMessage, section: Section, name: &str, name_offset: &mut u16) {
    let outcome = tx.append_multiple_labels(section, name, name_offset);
    if outcome == AppendOutcome::AppendedFullNameAsCompressed {
        return;
    }
    tx.append_domain_name(section);
}
