use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use crate::message::Section;
use crate::proto::tx::TxMessageType;

/// Number of times a changed record is announced. The announce intervals
/// double: 1 s, 2 s, 4 s.
pub(crate) const NUM_ANNOUNCES: u8 = 3;

/// Time between the first two announces.
pub(crate) const ANNOUNCE_INTERVAL: Duration = Duration::from_millis(1000);

/// Minimum interval between two multicasts of the same record (RFC 6762 §6).
const MIN_INTERVAL_BETWEEN_MULTICAST: Duration = Duration::from_millis(1000);

/// Validity window of the last-multicast timestamp. A record not multicast
/// again within this window is treated as never multicast.
const LAST_MULTICAST_AGE: Duration = Duration::from_secs(10 * 60 * 60);

/// The earliest pending action time of an entry. `set` keeps the minimum.
#[derive(Default, Clone, Copy, Debug)]
pub(crate) struct FireTime {
    time: Option<Instant>,
}

impl FireTime {
    pub(crate) fn clear(&mut self) {
        self.time = None;
    }

    pub(crate) fn get(&self) -> Option<Instant> {
        self.time
    }

    pub(crate) fn set(&mut self, fire_time: Instant) {
        match self.time {
            Some(current) if current <= fire_time => {}
            _ => self.time = Some(fire_time),
        }
    }

    /// Replaces any earlier fire time, used to hold off a probe restart.
    pub(crate) fn force(&mut self, fire_time: Instant) {
        self.time = Some(fire_time);
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        matches!(self.time, Some(t) if t <= now)
    }
}

/// Parameters of a scheduled answer to a received question.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AnswerInfo {
    pub(crate) question_rr_type: u16,
    pub(crate) answer_time: Instant,
    pub(crate) is_probe: bool,
    pub(crate) unicast_response: bool,
}

/// Tracks whether a record is appended in the message being built, or still
/// needs to be appended in the Additional Data section.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
enum AppendState {
    #[default]
    NotAppended,
    ToAppendInAdditional,
    AppendedInMulticastMsg,
    AppendedInUnicastMsg,
}

/// Per-record presence, TTL, and answer/announce timing state.
#[derive(Default, Debug)]
pub(crate) struct RecordInfo {
    present: bool,
    ttl: u32,
    announce_counter: u8,
    announce_time: Option<Instant>,
    multicast_answer_pending: bool,
    unicast_answer_pending: bool,
    answer_time: Option<Instant>,
    last_multicast_time: Option<Instant>,
    append_state: AppendState,
    append_section: Section,
}

impl RecordInfo {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn is_present(&self) -> bool {
        self.present
    }

    pub(crate) fn ttl(&self) -> u32 {
        self.ttl
    }

    // Property update helpers. A property is updated if the record has no
    // value yet or if its current value differs from the new one; any change
    // restarts announcing.

    pub(crate) fn update_ttl(&mut self, ttl: u32, now: Instant) {
        if !self.present || self.ttl != ttl {
            self.present = true;
            self.ttl = ttl;
            self.start_announcing(now);
        }
    }

    pub(crate) fn update_u16(&mut self, property: &mut u16, value: u16, now: Instant) {
        if !self.present || *property != value {
            self.present = true;
            *property = value;
            self.start_announcing(now);
        }
    }

    pub(crate) fn update_data(&mut self, property: &mut Vec<u8>, value: &[u8], now: Instant) {
        if !self.present || property.as_slice() != value {
            self.present = true;
            property.clear();
            property.extend_from_slice(value);
            self.start_announcing(now);
        }
    }

    pub(crate) fn update_name(&mut self, property: &mut String, value: &str, now: Instant) {
        if !self.present || !property.eq_ignore_ascii_case(value) {
            self.present = true;
            property.clear();
            property.push_str(value);
            self.start_announcing(now);
        }
    }

    pub(crate) fn update_addresses(
        &mut self,
        property: &mut Vec<Ipv6Addr>,
        value: &[Ipv6Addr],
        now: Instant,
    ) {
        let matches = property.len() == value.len()
            && value.iter().all(|addr| property.contains(addr));
        if !self.present || !matches {
            self.present = true;
            property.clear();
            property.extend_from_slice(value);
            self.start_announcing(now);
        }
    }

    pub(crate) fn start_announcing(&mut self, now: Instant) {
        if self.present {
            self.announce_counter = 0;
            self.announce_time = Some(now);
        }
    }

    pub(crate) fn can_answer(&self) -> bool {
        self.present && self.ttl > 0
    }

    pub(crate) fn schedule_answer(&mut self, info: &AnswerInfo) {
        if !self.can_answer() {
            return;
        }

        if info.unicast_response {
            // A unicast answer is only given while peers are expected to
            // still hold the record: within a quarter of the TTL since the
            // last multicast. Otherwise the answer is shared on multicast so
            // all caches converge.
            let quarter_ttl = Duration::from_secs(u64::from(self.ttl / 4));
            if self.duration_since_last_multicast(info.answer_time) <= quarter_ttl {
                self.unicast_answer_pending = true;
                return;
            }
        }

        if !info.is_probe {
            // Rate-limiting multicasts (RFC 6762 section 6): a minimum of
            // one second between multicast transmissions of the same record.
            // A querier that missed the previous transmission will retry.
            if self.duration_since_last_multicast(info.answer_time) < MIN_INTERVAL_BETWEEN_MULTICAST
            {
                return;
            }
        }

        if self.multicast_answer_pending {
            match self.answer_time {
                Some(pending) if info.answer_time >= pending => return,
                _ => {}
            }
        }

        self.multicast_answer_pending = true;
        self.answer_time = Some(info.answer_time);
    }

    pub(crate) fn should_append_to(&self, response_type: TxMessageType, now: Instant) -> bool {
        if !self.present {
            return false;
        }

        match response_type {
            TxMessageType::MulticastResponse => {
                if self.announce_counter < NUM_ANNOUNCES {
                    if let Some(announce_time) = self.announce_time {
                        if announce_time <= now {
                            return true;
                        }
                    }
                }
                self.multicast_answer_pending
                    && matches!(self.answer_time, Some(t) if t <= now)
            }
            TxMessageType::UnicastResponse => self.unicast_answer_pending,
            _ => false,
        }
    }

    /// Updates the state after a response containing the record in its
    /// Answer section has been prepared.
    pub(crate) fn update_state_after_answer(&mut self, response_type: TxMessageType, now: Instant) {
        if !self.present {
            return;
        }

        match response_type {
            TxMessageType::MulticastResponse => {
                if self.append_state != AppendState::AppendedInMulticastMsg
                    || self.append_section != Section::Answer
                {
                    return;
                }

                self.multicast_answer_pending = false;

                if self.announce_counter < NUM_ANNOUNCES {
                    if self.ttl == 0 {
                        // A goodbye is a single-shot announce.
                        self.present = false;
                    } else {
                        self.announce_counter += 1;
                        if self.announce_counter < NUM_ANNOUNCES {
                            let delay = ANNOUNCE_INTERVAL * (1 << (self.announce_counter - 1));
                            self.announce_time = Some(now + delay);
                        }
                    }
                }
            }

            TxMessageType::UnicastResponse => {
                if !self.is_appended() || self.append_section != Section::Answer {
                    return;
                }
                self.unicast_answer_pending = false;
            }

            _ => {}
        }
    }

    pub(crate) fn update_fire_time(&mut self, fire_time: &mut FireTime, now: Instant) {
        if !self.present {
            return;
        }

        if self.announce_counter < NUM_ANNOUNCES {
            if let Some(announce_time) = self.announce_time {
                fire_time.set(announce_time);
            }
        }

        if self.multicast_answer_pending {
            if let Some(answer_time) = self.answer_time {
                fire_time.set(answer_time);
            }
        }

        if let Some(last) = self.last_multicast_time {
            // The last-multicast timestamp ages out if the record is not
            // multicast again within `LAST_MULTICAST_AGE`.
            let age_time = last + LAST_MULTICAST_AGE;
            if age_time <= now {
                self.last_multicast_time = None;
            } else {
                fire_time.set(age_time);
            }
        }
    }

    pub(crate) fn mark_as_appended(
        &mut self,
        message_type: TxMessageType,
        section: Section,
        now: Instant,
    ) {
        self.append_section = section;

        match message_type {
            TxMessageType::MulticastResponse | TxMessageType::MulticastProbe => {
                self.append_state = AppendState::AppendedInMulticastMsg;
                if section == Section::Answer || section == Section::Additional {
                    self.last_multicast_time = Some(now);
                }
            }
            TxMessageType::UnicastResponse => {
                self.append_state = AppendState::AppendedInUnicastMsg;
            }
            TxMessageType::MulticastQuery => {}
        }
    }

    pub(crate) fn mark_as_not_appended(&mut self) {
        self.append_state = AppendState::NotAppended;
    }

    pub(crate) fn mark_to_append_in_additional(&mut self) {
        if self.append_state == AppendState::NotAppended {
            self.append_state = AppendState::ToAppendInAdditional;
        }
    }

    pub(crate) fn is_appended(&self) -> bool {
        matches!(
            self.append_state,
            AppendState::AppendedInMulticastMsg | AppendState::AppendedInUnicastMsg
        )
    }

    pub(crate) fn can_append(&self) -> bool {
        self.present && !self.is_appended()
    }

    pub(crate) fn should_append_in_additional(&self) -> bool {
        self.append_state == AppendState::ToAppendInAdditional
    }

    pub(crate) fn last_multicast_time(&self) -> Option<Instant> {
        if self.present {
            self.last_multicast_time
        } else {
            None
        }
    }

    pub(crate) fn duration_since_last_multicast(&self, at: Instant) -> Duration {
        match self.last_multicast_time {
            Some(last) if self.present => at.saturating_duration_since(last),
            _ => Duration::MAX,
        }
    }
}
