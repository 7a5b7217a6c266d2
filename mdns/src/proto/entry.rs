use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;
use shared::error::Error;

use crate::message::records::TypeBitmap;
use crate::message::{class_for, DnsType, Section, CLASS_INTERNET, CLASS_QU_FLAG};
use crate::proto::record::{AnswerInfo, FireTime, RecordInfo};
use crate::proto::tx::{TxMessage, TxMessageType};
use crate::proto::{KeyInfo, RequestId, ResponderEvent, DEFAULT_KEY_TTL, NSEC_TTL};

pub(crate) const NUM_PROBES: u8 = 3;
pub(crate) const MAX_INITIAL_PROBE_DELAY: Duration = Duration::from_millis(20);
pub(crate) const PROBE_WAIT_TIME: Duration = Duration::from_millis(250);
pub(crate) const PROBE_CONFLICT_HOLD_TIME: Duration = Duration::from_millis(1000);

/// Minimum interval between multicast probe responses of the same records.
const MIN_INTERVAL_PROBE_RESPONSE: Duration = Duration::from_millis(250);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum EntryState {
    Probing,
    Registered,
    Conflict,
    Removing,
}

/// State shared by host and service entries: lifecycle, probe counter, the
/// optional KEY record, pending registration callbacks, and the NSEC answer
/// pair.
pub(crate) struct EntryCore {
    state: EntryState,
    pub(crate) probe_count: u8,
    multicast_nsec_pending: bool,
    unicast_nsec_pending: bool,
    appended_nsec: bool,
    nsec_answer_time: Option<Instant>,
    pub(crate) key_record: RecordInfo,
    pub(crate) key_data: Vec<u8>,
    callback: Option<RequestId>,
    key_callback: Option<RequestId>,
    pub(crate) fire_time: FireTime,
}

impl EntryCore {
    pub(crate) fn new(now: Instant) -> Self {
        let mut core = Self {
            state: EntryState::Probing,
            probe_count: 0,
            multicast_nsec_pending: false,
            unicast_nsec_pending: false,
            appended_nsec: false,
            nsec_answer_time: None,
            key_record: RecordInfo::new(),
            key_data: Vec::new(),
            callback: None,
            key_callback: None,
            fire_time: FireTime::default(),
        };
        core.start_probing(now);
        core
    }

    pub(crate) fn state(&self) -> EntryState {
        self.state
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.state == EntryState::Registered
    }

    /// Resolves pending registration callbacks once the entry has reached a
    /// reportable state. Events are queued, so callers always observe them
    /// after the mutating call has returned.
    fn flush_callbacks(&mut self, events: &mut VecDeque<ResponderEvent>) {
        match self.state {
            EntryState::Registered => {
                if let Some(id) = self.key_callback.take() {
                    events.push_back(ResponderEvent::Registered(id));
                }
                if let Some(id) = self.callback.take() {
                    events.push_back(ResponderEvent::Registered(id));
                }
            }
            EntryState::Conflict => {
                if let Some(id) = self.key_callback.take() {
                    events.push_back(ResponderEvent::RegisterFailed(id, Error::ErrDuplicated));
                }
                if let Some(id) = self.callback.take() {
                    events.push_back(ResponderEvent::RegisterFailed(id, Error::ErrDuplicated));
                }
            }
            EntryState::Probing | EntryState::Removing => {}
        }
    }

    pub(crate) fn set_callback(
        &mut self,
        request_id: RequestId,
        events: &mut VecDeque<ResponderEvent>,
    ) {
        self.callback = Some(request_id);
        self.flush_callbacks(events);
    }

    pub(crate) fn clear_callback(&mut self) {
        self.callback = None;
    }

    pub(crate) fn set_registered(&mut self, events: &mut VecDeque<ResponderEvent>) {
        self.state = EntryState::Registered;
        self.flush_callbacks(events);
    }

    pub(crate) fn set_state_to_conflict(&mut self, events: &mut VecDeque<ResponderEvent>) {
        match self.state {
            EntryState::Probing | EntryState::Registered => {
                self.state = EntryState::Conflict;
                self.flush_callbacks(events);
            }
            EntryState::Conflict | EntryState::Removing => {}
        }
    }

    pub(crate) fn set_state_to_removing(&mut self) {
        self.state = EntryState::Removing;
    }

    pub(crate) fn start_probing(&mut self, now: Instant) {
        self.state = EntryState::Probing;
        self.probe_count = 0;
        let delay = rand::thread_rng().gen_range(Duration::ZERO..MAX_INITIAL_PROBE_DELAY);
        self.fire_time.set(now + delay);
    }

    /// Holds off probing for one second after losing a probe tiebreak, then
    /// restarts the probe sequence.
    pub(crate) fn hold_and_restart_probing(&mut self, now: Instant) {
        self.state = EntryState::Probing;
        self.probe_count = 0;
        self.fire_time.force(now + PROBE_CONFLICT_HOLD_TIME);
    }

    pub(crate) fn register_key(
        &mut self,
        key: &KeyInfo,
        request_id: RequestId,
        events: &mut VecDeque<ResponderEvent>,
        now: Instant,
    ) {
        if self.state == EntryState::Removing {
            self.start_probing(now);
        }

        let ttl = super::determine_ttl(key.ttl, DEFAULT_KEY_TTL);
        self.key_record.update_ttl(ttl, now);
        let mut key_data = std::mem::take(&mut self.key_data);
        self.key_record.update_data(&mut key_data, &key.key_data, now);
        self.key_data = key_data;

        self.key_callback = Some(request_id);
        self.flush_callbacks(events);
    }

    pub(crate) fn unregister_key(&mut self, now: Instant) {
        if !self.key_record.is_present() {
            return;
        }

        self.key_callback = None;

        match self.state {
            EntryState::Registered => self.key_record.update_ttl(0, now),
            EntryState::Probing | EntryState::Conflict => self.clear_key(),
            EntryState::Removing => {}
        }
    }

    pub(crate) fn clear_key(&mut self) {
        self.key_record.clear();
        self.key_data.clear();
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.key_record.mark_as_not_appended();
        self.appended_nsec = false;
    }

    pub(crate) fn update_records_state(&mut self, response_type: TxMessageType, now: Instant) {
        self.key_record.update_state_after_answer(response_type, now);

        if self.appended_nsec {
            match response_type {
                TxMessageType::MulticastResponse => self.multicast_nsec_pending = false,
                TxMessageType::UnicastResponse => self.unicast_nsec_pending = false,
                _ => {}
            }
        }
    }

    /// Schedules an NSEC record to be included in a response, answering a
    /// query for a record type that is not present on this name.
    pub(crate) fn schedule_nsec_answer(&mut self, info: &AnswerInfo) {
        if self.state != EntryState::Registered {
            return;
        }

        if info.unicast_response {
            self.unicast_nsec_pending = true;
        } else {
            if self.multicast_nsec_pending {
                match self.nsec_answer_time {
                    Some(pending) if info.answer_time >= pending => return,
                    _ => {}
                }
            }
            self.multicast_nsec_pending = true;
            self.nsec_answer_time = Some(info.answer_time);
        }
    }

    pub(crate) fn should_answer_nsec(&self, response_type: TxMessageType, now: Instant) -> bool {
        match response_type {
            TxMessageType::MulticastResponse => {
                self.multicast_nsec_pending
                    && matches!(self.nsec_answer_time, Some(t) if t <= now)
            }
            TxMessageType::UnicastResponse => self.unicast_nsec_pending,
            _ => false,
        }
    }

    pub(crate) fn determine_next_fire_time(&mut self, now: Instant) {
        let mut fire_time = self.fire_time;
        self.key_record.update_fire_time(&mut fire_time, now);
        if self.multicast_nsec_pending {
            if let Some(t) = self.nsec_answer_time {
                fire_time.set(t);
            }
        }
        self.fire_time = fire_time;
    }

    /// Appends this entry's question fields for a probe. The caller appends
    /// the name first. The first probe is a "QU" question when allowed.
    pub(crate) fn append_question_fields(&self, tx: &mut TxMessage, qu_allowed: bool) {
        let mut class = CLASS_INTERNET;
        if self.probe_count == 1 && qu_allowed {
            class |= CLASS_QU_FLAG;
        }
        tx.append_question_fields(DnsType::Any, class);
    }

    /// Appends the KEY record; `append_name` writes this entry's name into
    /// the given section.
    pub(crate) fn append_key_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        now: Instant,
        append_name: impl FnOnce(&mut TxMessage, Section),
    ) {
        if !self.key_record.can_append() {
            return;
        }
        self.key_record.mark_as_appended(tx.get_type(), section, now);

        append_name(tx, section);
        let len_off = tx.append_record_header(
            section,
            DnsType::Key,
            class_for(section, true),
            self.key_record.ttl(),
        );
        tx.append_rdata(section, &self.key_data);
        tx.patch_rdlength(section, len_off);

        tx.increment_record_count(section);
    }

    /// Appends an NSEC record asserting which record types exist for this
    /// entry's name.
    pub(crate) fn append_nsec_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        types: &TypeBitmap,
        mut append_name: impl FnMut(&mut TxMessage, Section),
    ) {
        append_name(tx, section);
        let len_off =
            tx.append_record_header(section, DnsType::Nsec, class_for(section, true), NSEC_TTL);

        // Next domain name, equal to the owner name for mDNS.
        append_name(tx, section);
        let mut rdata = Vec::new();
        types.append_to(&mut rdata);
        tx.append_rdata(section, &rdata);
        tx.patch_rdlength(section, len_off);

        tx.increment_record_count(section);
        self.appended_nsec = true;
    }
}

/// Schedules answers for matching records of a non-probe question, falling
/// back to an NSEC answer when the name is owned but the type is absent.
/// Returns whether an NSEC answer should be scheduled.
pub(crate) fn answer_non_probe(
    info: &AnswerInfo,
    records: &mut [(&mut RecordInfo, DnsType, bool)],
) -> bool {
    let mut all_empty_or_zero_ttl = true;
    let mut answer_nsec = true;

    for (record, rr_type, suppressed) in records.iter_mut() {
        if !record.can_answer() {
            // Cannot answer if the record is absent or has zero TTL.
            continue;
        }

        all_empty_or_zero_ttl = false;

        if crate::message::question_matches(info.question_rr_type, *rr_type) {
            answer_nsec = false;
            if !*suppressed {
                record.schedule_answer(info);
            }
        }
    }

    // If all records are removed or have zero TTL (goodbyes still being
    // announced), no answer is provided, not even NSEC.
    !all_empty_or_zero_ttl && answer_nsec
}

/// Schedules immediate answers to a probe query for this entry's name,
/// rate-limited to one multicast probe response per 250 ms.
pub(crate) fn answer_probe(
    info: &AnswerInfo,
    records: &mut [(&mut RecordInfo, DnsType, bool)],
    now: Instant,
) {
    let mut all_empty_or_zero_ttl = true;
    let mut should_delay = true;
    let mut answer_info = *info;

    answer_info.answer_time = now;

    for (record, _, _) in records.iter_mut() {
        if !record.can_answer() {
            continue;
        }

        all_empty_or_zero_ttl = false;

        if answer_info.unicast_response {
            should_delay = false;
            continue;
        }

        // The response is delayed only when every answering record was
        // multicast within the last `MIN_INTERVAL_PROBE_RESPONSE`.
        if record.duration_since_last_multicast(now) >= MIN_INTERVAL_PROBE_RESPONSE {
            should_delay = false;
        } else if let Some(last) = record.last_multicast_time() {
            let delayed = last + MIN_INTERVAL_PROBE_RESPONSE;
            if delayed > answer_info.answer_time {
                answer_info.answer_time = delayed;
            }
        }
    }

    if all_empty_or_zero_ttl {
        // All records are removed or being removed.
        return;
    }

    if !should_delay {
        answer_info.answer_time = now;
    }

    for (record, _, _) in records.iter_mut() {
        record.schedule_answer(&answer_info);
    }
}
