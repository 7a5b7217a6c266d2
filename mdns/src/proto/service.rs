use std::collections::VecDeque;
use std::time::Instant;

use crate::message::name::{self, WireName};
use crate::message::records::TypeBitmap;
use crate::message::{class_for, DnsType, Section, CLASS_INTERNET};
use crate::proto::entry::{answer_non_probe, answer_probe, EntryCore, EntryState};
use crate::proto::host::{append_host_name, HostEntry};
use crate::proto::record::{AnswerInfo, FireTime, RecordInfo};
use crate::proto::tx::{AppendOutcome, TxMessage, TxMessageType, SUB_SERVICE_LABEL, UNSPECIFIED_OFFSET};
use crate::proto::{ServiceInfo, RequestId, ResponderEvent, DEFAULT_TTL, SERVICES_PTR_TTL};

const EMPTY_TXT_DATA: [u8; 1] = [0];

/// A sub-type of a service entry, with its own PTR record.
pub(crate) struct SubType {
    pub(crate) label: String,
    pub(crate) ptr_record: RecordInfo,
    pub(crate) sub_service_name_offset: u16,
}

impl SubType {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ptr_record: RecordInfo::new(),
            sub_service_name_offset: UNSPECIFIED_OFFSET,
        }
    }

    fn matches(&self, label: &str) -> bool {
        self.label.eq_ignore_ascii_case(label)
    }

    fn is_contained_in(&self, service: &ServiceInfo) -> bool {
        service
            .sub_type_labels
            .iter()
            .any(|label| self.matches(label))
    }
}

/// A registered service instance with its PTR/SRV/TXT/KEY records and
/// sub-types.
pub(crate) struct ServiceEntry {
    pub(crate) core: EntryCore,
    pub(crate) service_instance: String,
    pub(crate) service_type: String,
    pub(crate) ptr_record: RecordInfo,
    pub(crate) srv_record: RecordInfo,
    pub(crate) txt_record: RecordInfo,
    pub(crate) sub_types: Vec<SubType>,
    pub(crate) host_name: String,
    pub(crate) txt_data: Vec<u8>,
    pub(crate) priority: u16,
    pub(crate) weight: u16,
    pub(crate) port: u16,
    pub(crate) service_name_offset: u16,
    pub(crate) service_type_offset: u16,
    pub(crate) sub_service_type_offset: u16,
    pub(crate) host_name_offset: u16,
    pub(crate) is_added_in_service_types: bool,
}

impl ServiceEntry {
    pub(crate) fn new(service_instance: &str, service_type: &str, now: Instant) -> Self {
        Self {
            core: EntryCore::new(now),
            service_instance: service_instance.to_string(),
            service_type: service_type.to_string(),
            ptr_record: RecordInfo::new(),
            srv_record: RecordInfo::new(),
            txt_record: RecordInfo::new(),
            sub_types: Vec::new(),
            host_name: String::new(),
            txt_data: Vec::new(),
            priority: 0,
            weight: 0,
            port: 0,
            service_name_offset: UNSPECIFIED_OFFSET,
            service_type_offset: UNSPECIFIED_OFFSET,
            sub_service_type_offset: UNSPECIFIED_OFFSET,
            host_name_offset: UNSPECIFIED_OFFSET,
            is_added_in_service_types: false,
        }
    }

    /// Matches `aName` against the full service instance name.
    pub(crate) fn matches_name(&self, name: &WireName) -> bool {
        name.matches(Some(&self.service_instance), &self.service_type)
    }

    /// When matching the service type, the PTR record must be present with a
    /// non-zero TTL.
    pub(crate) fn matches_service_type(&self, service_type: &WireName) -> bool {
        self.ptr_record.can_answer() && service_type.matches(None, &self.service_type)
    }

    pub(crate) fn matches_instance_and_type(&self, instance: &str, service_type: &str) -> bool {
        self.service_instance.eq_ignore_ascii_case(instance)
            && self.service_type.eq_ignore_ascii_case(service_type)
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.ptr_record.is_present() && !self.core.key_record.is_present()
    }

    pub(crate) fn can_answer_sub_type(&self, sub_label: &str) -> bool {
        if !self.ptr_record.can_answer() {
            return false;
        }
        self.sub_types
            .iter()
            .any(|sub| sub.matches(sub_label) && sub.ptr_record.can_answer())
    }

    pub(crate) fn register(
        &mut self,
        service: &ServiceInfo,
        request_id: RequestId,
        events: &mut VecDeque<ResponderEvent>,
        now: Instant,
    ) {
        let ttl = super::determine_ttl(service.ttl, DEFAULT_TTL);

        if self.core.state() == EntryState::Removing {
            self.core.start_probing(now);
        }

        self.core.set_callback(request_id, events);

        // Removed sub-types are kept with zero TTL so their removal is
        // announced before they are dropped from the list.
        for sub in &mut self.sub_types {
            let sub_ttl = if sub.is_contained_in(service) { ttl } else { 0 };
            sub.ptr_record.update_ttl(sub_ttl, now);
        }

        for label in &service.sub_type_labels {
            if !self.sub_types.iter().any(|sub| sub.matches(label)) {
                let mut sub = SubType::new(label);
                sub.ptr_record.update_ttl(ttl, now);
                self.sub_types.push(sub);
            }
        }

        self.ptr_record.update_ttl(ttl, now);

        self.srv_record.update_ttl(ttl, now);
        self.srv_record
            .update_name(&mut self.host_name, &service.host_name, now);
        self.srv_record
            .update_u16(&mut self.priority, service.priority, now);
        self.srv_record.update_u16(&mut self.weight, service.weight, now);
        self.srv_record.update_u16(&mut self.port, service.port, now);

        self.txt_record.update_ttl(ttl, now);
        if service.txt_data.is_empty() {
            self.txt_record
                .update_data(&mut self.txt_data, &EMPTY_TXT_DATA, now);
        } else {
            self.txt_record
                .update_data(&mut self.txt_data, &service.txt_data, now);
        }

        self.determine_next_fire_time(now);
    }

    pub(crate) fn unregister(&mut self, now: Instant) {
        if !self.ptr_record.is_present() {
            return;
        }

        self.core.clear_callback();

        match self.core.state() {
            EntryState::Registered => {
                for sub in &mut self.sub_types {
                    sub.ptr_record.update_ttl(0, now);
                }

                self.ptr_record.update_ttl(0, now);
                self.srv_record.update_ttl(0, now);
                self.txt_record.update_ttl(0, now);
                self.determine_next_fire_time(now);
            }
            EntryState::Probing | EntryState::Conflict => {
                self.clear_service();
                self.schedule_to_remove_if_empty();
            }
            EntryState::Removing => {}
        }
    }

    fn clear_service(&mut self) {
        self.ptr_record.clear();
        self.srv_record.clear();
        self.txt_record.clear();
        self.sub_types.clear();
        self.host_name.clear();
        self.txt_data.clear();
    }

    pub(crate) fn schedule_to_remove_if_empty(&mut self) {
        self.sub_types.retain(|sub| sub.ptr_record.is_present());

        if self.is_empty() {
            self.core.set_state_to_removing();
        }
    }

    /// Answers a question for the full service instance name with the
    /// SRV/TXT/KEY record set.
    pub(crate) fn answer_service_name_question(
        &mut self,
        info: &AnswerInfo,
        suppress_srv: bool,
        suppress_txt: bool,
        suppress_key: bool,
        now: Instant,
    ) {
        if !self.core.is_registered() {
            return;
        }

        let schedule_nsec = {
            let mut records = [
                (&mut self.srv_record, DnsType::Srv, suppress_srv),
                (&mut self.txt_record, DnsType::Txt, suppress_txt),
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

    /// Answers a PTR question for the service type, or for the given
    /// sub-type.
    pub(crate) fn answer_service_type_question(
        &mut self,
        info: &AnswerInfo,
        sub_label: Option<&str>,
        now: Instant,
    ) {
        if !self.core.is_registered() {
            return;
        }

        match sub_label {
            None => self.ptr_record.schedule_answer(info),
            Some(label) => {
                match self.sub_types.iter_mut().find(|sub| sub.matches(label)) {
                    Some(sub) => sub.ptr_record.schedule_answer(info),
                    None => return,
                }
            }
        }

        self.determine_next_fire_time(now);
    }

    /// Reports whether a known answer with `ttl` suppresses the PTR answer
    /// for the base service type or the given sub-type.
    pub(crate) fn should_suppress_known_answer(&self, ttl: u32, sub_label: Option<&str>) -> bool {
        let record_ttl = match sub_label {
            None => self.ptr_record.ttl(),
            Some(label) => match self.sub_types.iter().find(|sub| sub.matches(label)) {
                Some(sub) => sub.ptr_record.ttl(),
                None => return false,
            },
        };

        ttl >= record_ttl / 2
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.core.clear_append_state();

        self.ptr_record.mark_as_not_appended();
        self.srv_record.mark_as_not_appended();
        self.txt_record.mark_as_not_appended();

        self.service_name_offset = UNSPECIFIED_OFFSET;
        self.service_type_offset = UNSPECIFIED_OFFSET;
        self.sub_service_type_offset = UNSPECIFIED_OFFSET;
        self.host_name_offset = UNSPECIFIED_OFFSET;

        for sub in &mut self.sub_types {
            sub.ptr_record.mark_as_not_appended();
            sub.sub_service_name_offset = UNSPECIFIED_OFFSET;
        }
    }

    pub(crate) fn prepare_probe_records(
        &mut self,
        tx: &mut TxMessage,
        qu_allowed: bool,
        now: Instant,
    ) {
        self.append_service_name_to(tx, Section::Question);
        self.core.append_question_fields(tx, qu_allowed);

        self.append_srv_record_to(tx, Section::Authority, now);
        self.append_txt_record_to(tx, Section::Authority, now);
        self.append_key_record_to(tx, Section::Authority, now);
    }

    pub(crate) fn start_announcing(&mut self, now: Instant) {
        for sub in &mut self.sub_types {
            sub.ptr_record.start_announcing(now);
        }

        self.ptr_record.start_announcing(now);
        self.srv_record.start_announcing(now);
        self.txt_record.start_announcing(now);
        self.core.key_record.start_announcing(now);
    }

    /// Appends this entry's due records. Additional Data selection follows
    /// RFC 6763 section 12: a PTR answer pulls in SRV, TXT, and the host
    /// addresses; an SRV answer pulls in the host addresses. Records already
    /// placed in the Answer section are not duplicated.
    pub(crate) fn prepare_response_records(
        &mut self,
        tx: &mut TxMessage,
        mut host: Option<&mut HostEntry>,
        now: Instant,
    ) {
        let response_type = tx.get_type();
        let mut append_nsec = false;

        if self.ptr_record.should_append_to(response_type, now) {
            self.append_ptr_record_to(tx, Section::Answer, None, now);

            if self.ptr_record.ttl() > 0 {
                self.srv_record.mark_to_append_in_additional();
                self.txt_record.mark_to_append_in_additional();
                if let Some(host) = host.as_deref_mut() {
                    host.addr_record.mark_to_append_in_additional();
                }
            }
        }

        for index in 0..self.sub_types.len() {
            if self.sub_types[index]
                .ptr_record
                .should_append_to(response_type, now)
            {
                self.append_ptr_record_to(tx, Section::Answer, Some(index), now);
            }
        }

        if self.srv_record.should_append_to(response_type, now) {
            self.append_srv_record_to(tx, Section::Answer, now);
            append_nsec = true;

            if self.srv_record.ttl() > 0 {
                if let Some(host) = host.as_deref_mut() {
                    host.addr_record.mark_to_append_in_additional();
                }
            }
        }

        if self.txt_record.should_append_to(response_type, now) {
            self.append_txt_record_to(tx, Section::Answer, now);
            append_nsec = true;
        }

        if self.core.key_record.should_append_to(response_type, now) {
            self.append_key_record_to(tx, Section::Answer, now);
            append_nsec = true;
        }

        if self.srv_record.should_append_in_additional() {
            self.append_srv_record_to(tx, Section::Additional, now);
        }

        if self.txt_record.should_append_in_additional() {
            self.append_txt_record_to(tx, Section::Additional, now);
        }

        if let Some(host) = host {
            if host.addr_record.should_append_in_additional() {
                host.append_address_records_to(tx, Section::Additional, now);
            }
        }

        if append_nsec || self.core.should_answer_nsec(response_type, now) {
            let section = if append_nsec {
                Section::Additional
            } else {
                Section::Answer
            };
            self.append_nsec_record_to(tx, section);
        }
    }

    pub(crate) fn update_records_state(&mut self, response_type: TxMessageType, now: Instant) {
        self.core.update_records_state(response_type, now);

        self.ptr_record.update_state_after_answer(response_type, now);
        self.srv_record.update_state_after_answer(response_type, now);
        self.txt_record.update_state_after_answer(response_type, now);

        for sub in &mut self.sub_types {
            sub.ptr_record.update_state_after_answer(response_type, now);
        }

        self.sub_types.retain(|sub| sub.ptr_record.is_present());

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
        self.ptr_record.update_fire_time(&mut fire_time, now);
        self.srv_record.update_fire_time(&mut fire_time, now);
        self.txt_record.update_fire_time(&mut fire_time, now);

        for sub in &mut self.sub_types {
            sub.ptr_record.update_fire_time(&mut fire_time, now);
        }

        self.core.fire_time = fire_time;
    }

    fn append_srv_record_to(&mut self, tx: &mut TxMessage, section: Section, now: Instant) {
        if !self.srv_record.can_append() {
            return;
        }
        self.srv_record.mark_as_appended(tx.get_type(), section, now);

        self.append_service_name_to(tx, section);
        let len_off = tx.append_record_header(
            section,
            DnsType::Srv,
            class_for(section, true),
            self.srv_record.ttl(),
        );
        tx.append_rdata_u16(section, self.priority);
        tx.append_rdata_u16(section, self.weight);
        tx.append_rdata_u16(section, self.port);
        append_host_name(tx, section, &self.host_name, &mut self.host_name_offset);
        tx.patch_rdlength(section, len_off);

        tx.increment_record_count(section);
    }

    fn append_txt_record_to(&mut self, tx: &mut TxMessage, section: Section, now: Instant) {
        if !self.txt_record.can_append() {
            return;
        }
        self.txt_record.mark_as_appended(tx.get_type(), section, now);

        self.append_service_name_to(tx, section);
        let len_off = tx.append_record_header(
            section,
            DnsType::Txt,
            class_for(section, true),
            self.txt_record.ttl(),
        );
        tx.append_rdata(section, &self.txt_data);
        tx.patch_rdlength(section, len_off);

        tx.increment_record_count(section);
    }

    /// Appends the PTR record for the base service (`sub` is `None`) or for
    /// the given sub-type. PTR records are shared, so the cache-flush bit is
    /// never set on them.
    fn append_ptr_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        sub: Option<usize>,
        now: Instant,
    ) {
        let can_append = match sub {
            None => self.ptr_record.can_append(),
            Some(index) => self.sub_types[index].ptr_record.can_append(),
        };
        if !can_append {
            return;
        }

        let ttl = match sub {
            None => {
                self.ptr_record.mark_as_appended(tx.get_type(), section, now);
                self.ptr_record.ttl()
            }
            Some(index) => {
                let record = &mut self.sub_types[index].ptr_record;
                record.mark_as_appended(tx.get_type(), section, now);
                record.ttl()
            }
        };

        match sub {
            None => self.append_service_type_to(tx, section),
            Some(index) => {
                let sub_entry = &mut self.sub_types[index];
                let outcome = tx.append_label(
                    section,
                    &sub_entry.label,
                    &mut sub_entry.sub_service_name_offset,
                );
                if outcome == AppendOutcome::AppendedLabels {
                    let outcome = tx.append_label(
                        section,
                        SUB_SERVICE_LABEL,
                        &mut self.sub_service_type_offset,
                    );
                    if outcome == AppendOutcome::AppendedLabels {
                        tx.append_service_type(
                            section,
                            &self.service_type,
                            &mut self.service_type_offset,
                        );
                    }
                }
            }
        }

        let len_off = tx.append_record_header(section, DnsType::Ptr, CLASS_INTERNET, ttl);
        self.append_service_name_to(tx, section);
        tx.patch_rdlength(section, len_off);

        tx.increment_record_count(section);
    }

    fn append_key_record_to(&mut self, tx: &mut TxMessage, section: Section, now: Instant) {
        let instance = &self.service_instance;
        let service_type = &self.service_type;
        let name_offset = &mut self.service_name_offset;
        let type_offset = &mut self.service_type_offset;
        self.core
            .append_key_record_to(tx, section, now, |tx, section| {
                append_service_name(tx, section, instance, service_type, name_offset, type_offset);
            });
    }

    fn append_nsec_record_to(&mut self, tx: &mut TxMessage, section: Section) {
        let mut types = TypeBitmap::new();

        if self.srv_record.is_present() && self.srv_record.ttl() > 0 {
            types.add_type(DnsType::Srv as u16);
        }
        if self.txt_record.is_present() && self.txt_record.ttl() > 0 {
            types.add_type(DnsType::Txt as u16);
        }
        if self.core.key_record.is_present() && self.core.key_record.ttl() > 0 {
            types.add_type(DnsType::Key as u16);
        }

        if types.is_empty() {
            return;
        }

        let instance = &self.service_instance;
        let service_type = &self.service_type;
        let name_offset = &mut self.service_name_offset;
        let type_offset = &mut self.service_type_offset;
        self.core
            .append_nsec_record_to(tx, section, &types, |tx, section| {
                append_service_name(tx, section, instance, service_type, name_offset, type_offset);
            });
    }

    fn append_service_name_to(&mut self, tx: &mut TxMessage, section: Section) {
        append_service_name(
            tx,
            section,
            &self.service_instance,
            &self.service_type,
            &mut self.service_name_offset,
            &mut self.service_type_offset,
        );
    }

    fn append_service_type_to(&mut self, tx: &mut TxMessage, section: Section) {
        tx.append_service_type(section, &self.service_type, &mut self.service_type_offset);
    }

    /// Records proposed by this entry for probe tiebreaking, sorted by
    /// (class, type, record data).
    pub(crate) fn tiebreak_records(&self) -> Vec<(u16, u16, Vec<u8>)> {
        let mut records = Vec::new();

        if self.srv_record.can_answer() {
            records.push((CLASS_INTERNET, DnsType::Srv as u16, self.srv_rdata()));
        }
        if self.txt_record.can_answer() {
            records.push((CLASS_INTERNET, DnsType::Txt as u16, self.txt_data.clone()));
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

    /// Record data of every unique record this entry publishes under its
    /// name. The shared PTR records are excluded.
    pub(crate) fn record_data_set(&self) -> Vec<(u16, Vec<u8>)> {
        let mut set = Vec::new();
        if self.srv_record.is_present() {
            set.push((DnsType::Srv as u16, self.srv_rdata()));
        }
        if self.txt_record.is_present() {
            set.push((DnsType::Txt as u16, self.txt_data.clone()));
        }
        if self.core.key_record.is_present() {
            set.push((DnsType::Key as u16, self.core.key_data.clone()));
        }
        set
    }

    /// SRV record data in uncompressed form, target name in canonical
    /// lowercase.
    pub(crate) fn srv_rdata(&self) -> Vec<u8> {
        let mut rdata = Vec::new();
        rdata.extend_from_slice(&self.priority.to_be_bytes());
        rdata.extend_from_slice(&self.weight.to_be_bytes());
        rdata.extend_from_slice(&self.port.to_be_bytes());
        let target = format!("{}.{}", self.host_name.to_ascii_lowercase(), name::LOCAL_DOMAIN);
        let appended = name::append_multiple_labels(&mut rdata, &target);
        debug_assert!(appended.is_ok());
        name::append_terminator(&mut rdata);
        rdata
    }
}

fn append_service_name(
    tx: &mut TxMessage,
    section: Section,
    instance: &str,
    service_type: &str,
    name_offset: &mut u16,
    type_offset: &mut u16,
) {
    let outcome = tx.append_label(section, instance, name_offset);
    if outcome == AppendOutcome::AppendedFullNameAsCompressed {
        return;
    }
    tx.append_service_type(section, service_type, type_offset);
}

/// Tracks one service type to answer `_services._dns-sd._udp.local`
/// meta-queries, reference-counted by the service entries declaring it.
pub(crate) struct ServiceType {
    pub(crate) service_type: String,
    pub(crate) services_ptr: RecordInfo,
    pub(crate) num_entries: u16,
    pub(crate) fire_time: FireTime,
}

impl ServiceType {
    fn new(service_type: &str, now: Instant) -> Self {
        let mut entry = Self {
            service_type: service_type.to_string(),
            services_ptr: RecordInfo::new(),
            num_entries: 1,
            fire_time: FireTime::default(),
        };
        entry.services_ptr.update_ttl(SERVICES_PTR_TTL, now);
        let mut fire_time = entry.fire_time;
        entry.services_ptr.update_fire_time(&mut fire_time, now);
        entry.fire_time = fire_time;
        entry
    }

    pub(crate) fn matches_name(&self, name: &WireName) -> bool {
        name.matches(None, &self.service_type)
    }

    pub(crate) fn matches_service_type(&self, service_type: &str) -> bool {
        self.service_type.eq_ignore_ascii_case(service_type)
    }

    pub(crate) fn answer_question(&mut self, info: &AnswerInfo, now: Instant) {
        if !self.services_ptr.can_answer() {
            return;
        }
        self.services_ptr.schedule_answer(info);
        let mut fire_time = self.fire_time;
        self.services_ptr.update_fire_time(&mut fire_time, now);
        self.fire_time = fire_time;
    }

    pub(crate) fn should_suppress_known_answer(&self, ttl: u32) -> bool {
        ttl >= self.services_ptr.ttl() / 2
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.services_ptr.mark_as_not_appended();
    }

    pub(crate) fn prepare_response_records(
        &mut self,
        tx: &mut TxMessage,
        discovered_type_offset: u16,
        now: Instant,
    ) {
        if !self.services_ptr.should_append_to(tx.get_type(), now) {
            return;
        }
        self.append_ptr_record_to(tx, discovered_type_offset, now);
    }

    fn append_ptr_record_to(&mut self, tx: &mut TxMessage, type_offset: u16, now: Instant) {
        if !self.services_ptr.can_append() {
            return;
        }
        self.services_ptr
            .mark_as_appended(tx.get_type(), Section::Answer, now);

        let mut type_offset = type_offset;

        tx.append_services_dnssd_name(Section::Answer);
        let len_off = tx.append_record_header(
            Section::Answer,
            DnsType::Ptr,
            CLASS_INTERNET,
            self.services_ptr.ttl(),
        );
        tx.append_service_type(Section::Answer, &self.service_type, &mut type_offset);
        tx.patch_rdlength(Section::Answer, len_off);

        tx.increment_record_count(Section::Answer);
    }
}

/// Adds or removes `entry` from the service type list, called whenever the
/// entry's state or its PTR record changes. A service type whose last entry
/// leaves gets a goodbye for its meta PTR before being dropped.
pub(crate) fn update_service_types(
    service_types: &mut Vec<ServiceType>,
    entry: &mut ServiceEntry,
    now: Instant,
) {
    let should_add = entry.core.state() == EntryState::Registered && entry.ptr_record.can_answer();

    if should_add == entry.is_added_in_service_types {
        return;
    }

    entry.is_added_in_service_types = should_add;

    let position = service_types
        .iter()
        .position(|st| st.matches_service_type(&entry.service_type));

    if should_add {
        match position {
            Some(index) => {
                let service_type = &mut service_types[index];
                service_type.num_entries += 1;
                if !service_type.services_ptr.can_answer() {
                    // Revived while its goodbye was still pending.
                    service_type.services_ptr.update_ttl(SERVICES_PTR_TTL, now);
                    let mut fire_time = service_type.fire_time;
                    service_type
                        .services_ptr
                        .update_fire_time(&mut fire_time, now);
                    service_type.fire_time = fire_time;
                }
            }
            None => service_types.push(ServiceType::new(&entry.service_type, now)),
        }
    } else if let Some(index) = position {
        let service_type = &mut service_types[index];
        service_type.num_entries = service_type.num_entries.saturating_sub(1);

        if service_type.num_entries == 0 {
            // Goodbye the meta PTR; the entry is dropped once it is spent.
            service_type.services_ptr.update_ttl(0, now);
            let mut fire_time = service_type.fire_time;
            service_type
                .services_ptr
                .update_fire_time(&mut fire_time, now);
            service_type.fire_time = fire_time;
        }
    }
}
