//! Sans-I/O mDNS responder core.
//!
//! [`Responder`] owns the registered host, service, and service-type
//! entries, and drives them through the RFC 6762 lifecycle: probing to claim
//! each name, announcing the records, answering queries, defending names
//! against conflicts, and sending goodbyes on removal.
//!
//! All timing flows through the [`shared::Protocol`] surface: received
//! datagrams enter via `handle_read`, packets leave via `poll_write`, timers
//! advance via `handle_timeout`/`poll_timeout`, and registration outcomes are
//! reported via `poll_event`.

pub(crate) mod entry;
pub(crate) mod history;
pub(crate) mod host;
pub(crate) mod record;
pub(crate) mod rx;
pub(crate) mod service;
pub(crate) mod tx;

#[cfg(test)]
mod responder_test;

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use rand::Rng;

use shared::error::{Error, Result};
use shared::{Protocol, TaggedBytesMut, TransportContext, TransportProtocol};

use crate::config::ResponderConfig;
use crate::message::name::MAX_LABEL_LEN;
use crate::message::{question_matches, DnsType, Section, CLASS_INTERNET, CLASS_MASK};
use entry::{EntryState, NUM_PROBES, PROBE_WAIT_TIME};
use history::TxMessageHistory;
use host::HostEntry;
use record::AnswerInfo;
use rx::{MultiPacketRxMessages, RxMessage};
use service::{update_service_types, ServiceEntry, ServiceType};
use tx::{TxMessage, TxMessageType, SERVICES_DNSSD_LABELS, UNSPECIFIED_OFFSET};

/// The mDNS IPv6 multicast group address (`ff02::fb`).
pub const MDNS_MULTICAST_IPV6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// The standard mDNS port (5353).
pub const MDNS_PORT: u16 = 5353;

/// mDNS multicast destination address (`[ff02::fb]:5353`).
///
/// All multicast probes, announcements, and responses are sent here.
pub const MDNS_DEST_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V6(MDNS_MULTICAST_IPV6), MDNS_PORT);

/// Identifier associated with a registration request, echoed back in the
/// registration events.
pub type RequestId = u32;

pub(crate) const DEFAULT_TTL: u32 = 120;
pub(crate) const DEFAULT_KEY_TTL: u32 = DEFAULT_TTL;
pub(crate) const NSEC_TTL: u32 = 4500;
pub(crate) const SERVICES_PTR_TTL: u32 = 4500;

const MIN_RESPONSE_DELAY: Duration = Duration::from_millis(20);
const MAX_RESPONSE_DELAY: Duration = Duration::from_millis(120);

/// Answers for shared (PTR) records are spread over a wider window so
/// responders on the link do not all reply at once.
const MAX_SHARED_RESPONSE_DELAY: Duration = Duration::from_millis(500);

/// A host to register: a single-label name (the `.local.` domain is
/// implicit) and its IPv6 addresses.
#[derive(Clone, Debug, Default)]
pub struct HostInfo {
    /// Host name label, without the domain (e.g. `"myhost"`).
    pub host_name: String,
    /// IPv6 addresses to advertise. Registering with no addresses stops
    /// advertising the host's address records.
    pub addresses: Vec<Ipv6Addr>,
    /// Record TTL in seconds; zero selects the default (120 s).
    pub ttl: u32,
}

/// A service instance to register.
#[derive(Clone, Debug, Default)]
pub struct ServiceInfo {
    /// Service instance label, treated as a single DNS label (it may contain
    /// dot characters).
    pub service_instance: String,
    /// Service type, dot-separated labels without the domain
    /// (e.g. `"_http._tcp"`).
    pub service_type: String,
    /// Host name label of the service's host, without the domain.
    pub host_name: String,
    /// Sub-type labels associated with the service.
    pub sub_type_labels: Vec<String>,
    /// Encoded TXT data. Empty selects a single zero byte.
    pub txt_data: Vec<u8>,
    /// SRV port.
    pub port: u16,
    /// SRV weight.
    pub weight: u16,
    /// SRV priority.
    pub priority: u16,
    /// Record TTL in seconds; zero selects the default (120 s).
    pub ttl: u32,
}

/// A KEY record to register, attached to a host name or to a service
/// instance name.
#[derive(Clone, Debug, Default)]
pub struct KeyInfo {
    /// Host name label, or service instance label when `service_type` is
    /// set.
    pub name: String,
    /// Service type when the key belongs to a service instance.
    pub service_type: Option<String>,
    /// Key record data.
    pub key_data: Vec<u8>,
    /// Record TTL in seconds; zero selects the default (120 s).
    pub ttl: u32,
}

/// Events emitted by the responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderEvent {
    /// A registration claimed its name and is now advertised.
    Registered(RequestId),
    /// A registration failed; the error is [`Error::ErrDuplicated`] when the
    /// name is already claimed by another responder on the link.
    RegisterFailed(RequestId, Error),
    /// A registered name was lost to a conflicting responder. Carries the
    /// name (host name or service instance label) and the service type for
    /// service entries.
    Conflict(String, Option<String>),
}

/// Which local entry, if any, can answer a given question.
enum QuestionTarget {
    None,
    Host(usize),
    Service(usize),
    ServiceType { first_index: usize, sub_label: Option<String> },
    AllServices,
}

struct QuestionMeta {
    target: QuestionTarget,
    can_answer: bool,
    is_unique: bool,
}

/// Sans-I/O Multicast DNS responder (RFC 6762).
///
/// See the [crate docs](crate) for the event-loop pattern.
pub struct Responder {
    enabled: bool,
    question_unicast_allowed: bool,
    max_message_size: u16,
    hosts: Vec<HostEntry>,
    services: Vec<ServiceEntry>,
    service_types: Vec<ServiceType>,
    multi_packet: MultiPacketRxMessages,
    tx_history: TxMessageHistory,
    write_outs: VecDeque<TaggedBytesMut>,
    event_outs: VecDeque<ResponderEvent>,
}

impl Responder {
    /// Creates a new, disabled responder. Call
    /// [`set_enabled`](Self::set_enabled) before registering entries.
    pub fn new(config: ResponderConfig) -> Self {
        Self {
            enabled: false,
            question_unicast_allowed: config.question_unicast_allowed,
            max_message_size: config.max_message_size,
            hosts: Vec::new(),
            services: Vec::new(),
            service_types: Vec::new(),
            multi_packet: MultiPacketRxMessages::default(),
            tx_history: TxMessageHistory::default(),
            write_outs: VecDeque::new(),
            event_outs: VecDeque::new(),
        }
    }

    /// Enables or disables the responder.
    ///
    /// Disabling immediately stops all operation and drops every registered
    /// entry without goodbye announcements and without resolving their
    /// pending registration events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ErrAlready`] when already in the requested state.
    pub fn set_enabled(&mut self, enabled: bool, _now: Instant) -> Result<()> {
        if enabled == self.enabled {
            return Err(Error::ErrAlready);
        }

        self.enabled = enabled;

        if enabled {
            log::info!("enabling");
        } else {
            log::info!("disabling");
            self.hosts.clear();
            self.services.clear();
            self.service_types.clear();
            self.multi_packet.clear();
            self.tx_history.clear();
            self.write_outs.clear();
            self.event_outs.clear();
        }

        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets whether probes may request unicast responses ("QU" questions).
    pub fn set_question_unicast_allowed(&mut self, allow: bool) {
        self.question_unicast_allowed = allow;
    }

    pub fn is_question_unicast_allowed(&self) -> bool {
        self.question_unicast_allowed
    }

    /// Sets the max size threshold used to split larger messages. Mainly
    /// intended for testing.
    pub fn set_max_message_size(&mut self, max_size: u16) {
        if max_size > 0 {
            self.max_message_size = max_size;
        }
    }

    /// Registers or updates a host entry.
    ///
    /// A new name is first claimed by probing; the outcome arrives as a
    /// [`ResponderEvent::Registered`] or [`ResponderEvent::RegisterFailed`]
    /// event carrying `request_id`, always after this method has returned.
    /// Updating an existing entry does not re-probe; removed addresses are
    /// retired with a goodbye announcement.
    ///
    /// # Errors
    ///
    /// - [`Error::ErrInvalidState`] when the responder is disabled.
    /// - [`Error::ErrInvalidName`] when the host name is not a valid label.
    pub fn register_host(
        &mut self,
        host: HostInfo,
        request_id: RequestId,
        now: Instant,
    ) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }
        if !is_valid_label(&host.host_name) {
            return Err(Error::ErrInvalidName);
        }

        log::debug!("registering host {}", host.host_name);

        let index = self.host_index_or_insert(&host.host_name, now);
        self.hosts[index].register(&host, request_id, &mut self.event_outs, now);

        Ok(())
    }

    /// Unregisters a host, sending goodbye announcements for any previously
    /// advertised address records. Unregistering a name that is still
    /// probing cancels the probe without resolving its registration event.
    pub fn unregister_host(&mut self, host_name: &str, now: Instant) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }

        if let Some(index) = self
            .hosts
            .iter()
            .position(|host| host.matches_host_name(host_name))
        {
            log::debug!("unregistering host {host_name}");
            self.hosts[index].unregister(now);
        }

        self.remove_empty_entries();
        Ok(())
    }

    /// Registers or updates a service entry. Behaves like
    /// [`register_host`](Self::register_host) with respect to probing,
    /// updates, and events; removed sub-types are retired with goodbye
    /// announcements.
    pub fn register_service(
        &mut self,
        service: ServiceInfo,
        request_id: RequestId,
        now: Instant,
    ) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }
        if !is_valid_label(&service.service_instance)
            || !is_valid_service_type(&service.service_type)
            || !is_valid_label(&service.host_name)
            || !service.sub_type_labels.iter().all(|l| is_valid_label(l))
        {
            return Err(Error::ErrInvalidName);
        }

        log::debug!(
            "registering service {}.{}",
            service.service_instance,
            service.service_type
        );

        let index = self.service_index_or_insert(
            &service.service_instance,
            &service.service_type,
            now,
        );
        self.services[index].register(&service, request_id, &mut self.event_outs, now);
        update_service_types(&mut self.service_types, &mut self.services[index], now);

        Ok(())
    }

    /// Unregisters a service, sending goodbye announcements for all related
    /// records. When the last entry of a service type goes away, the
    /// `_services._dns-sd._udp` meta PTR is retired with a goodbye too.
    pub fn unregister_service(
        &mut self,
        service_instance: &str,
        service_type: &str,
        now: Instant,
    ) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }

        if let Some(index) = self
            .services
            .iter()
            .position(|s| s.matches_instance_and_type(service_instance, service_type))
        {
            log::debug!("unregistering service {service_instance}.{service_type}");
            self.services[index].unregister(now);
            update_service_types(&mut self.service_types, &mut self.services[index], now);
        }

        self.remove_empty_entries();
        Ok(())
    }

    /// Registers or updates a KEY record on a host name (no `service_type`)
    /// or a service instance name.
    pub fn register_key(
        &mut self,
        key: KeyInfo,
        request_id: RequestId,
        now: Instant,
    ) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }
        if !is_valid_label(&key.name) {
            return Err(Error::ErrInvalidName);
        }

        match key.service_type.clone() {
            None => {
                let index = self.host_index_or_insert(&key.name, now);
                self.hosts[index]
                    .core
                    .register_key(&key, request_id, &mut self.event_outs, now);
                self.hosts[index].determine_next_fire_time(now);
            }
            Some(service_type) => {
                if !is_valid_service_type(&service_type) {
                    return Err(Error::ErrInvalidName);
                }
                let index = self.service_index_or_insert(&key.name, &service_type, now);
                self.services[index]
                    .core
                    .register_key(&key, request_id, &mut self.event_outs, now);
                self.services[index].determine_next_fire_time(now);
            }
        }

        Ok(())
    }

    /// Unregisters a KEY record, sending a goodbye announcement for it.
    pub fn unregister_key(
        &mut self,
        name: &str,
        service_type: Option<&str>,
        now: Instant,
    ) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }

        match service_type {
            None => {
                if let Some(index) =
                    self.hosts.iter().position(|h| h.matches_host_name(name))
                {
                    self.hosts[index].core.unregister_key(now);
                    self.hosts[index].determine_next_fire_time(now);
                    self.hosts[index].schedule_to_remove_if_empty();
                }
            }
            Some(service_type) => {
                if let Some(index) = self
                    .services
                    .iter()
                    .position(|s| s.matches_instance_and_type(name, service_type))
                {
                    self.services[index].core.unregister_key(now);
                    self.services[index].determine_next_fire_time(now);
                    self.services[index].schedule_to_remove_if_empty();
                }
            }
        }

        self.remove_empty_entries();
        Ok(())
    }

    fn host_index_or_insert(&mut self, host_name: &str, now: Instant) -> usize {
        match self
            .hosts
            .iter()
            .position(|host| host.matches_host_name(host_name))
        {
            Some(index) => index,
            None => {
                self.hosts.push(HostEntry::new(host_name, now));
                self.hosts.len() - 1
            }
        }
    }

    fn service_index_or_insert(
        &mut self,
        service_instance: &str,
        service_type: &str,
        now: Instant,
    ) -> usize {
        match self
            .services
            .iter()
            .position(|s| s.matches_instance_and_type(service_instance, service_type))
        {
            Some(index) => index,
            None => {
                self.services
                    .push(ServiceEntry::new(service_instance, service_type, now));
                self.services.len() - 1
            }
        }
    }

    // - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
    // Inbound processing

    fn handle_message(&mut self, msg: TaggedBytesMut) {
        let is_unicast = !msg.transport.local_addr.ip().is_multicast();
        let sender = msg.transport.peer_addr;
        let now = msg.now;

        let rx_message = match RxMessage::parse(msg.message, sender, is_unicast, &self.tx_history) {
            Ok(rx_message) => rx_message,
            Err(err) => {
                log::debug!("dropping message from {sender}: {err}");
                return;
            }
        };

        if rx_message.is_self_originating {
            log::trace!("ignoring self-originating message from {sender}");
            return;
        }

        if rx_message.is_query {
            // A continuation of a multi-packet query carries no question and
            // only known-answer records.
            if rx_message.record_counts.get(Section::Question) == 0
                && rx_message.record_counts.get(Section::Answer) > 0
            {
                self.multi_packet.add_to_existing(rx_message, now);
                return;
            }

            let save_as_multi_packet =
                self.process_rx_query(std::slice::from_ref(&rx_message), false, now);
            if save_as_multi_packet {
                // A truncated query we can answer: defer the response,
                // waiting for follow-up packets with more known answers.
                self.multi_packet.add_new(rx_message, now);
            }
        } else {
            self.process_rx_response(&rx_message, now);
        }

        self.remove_empty_entries();
    }

    /// Processes a query (`group[0]`) together with any buffered follow-up
    /// known-answer packets. Returns `true` when the query is truncated and
    /// should be saved for multi-packet consolidation.
    fn process_rx_query(
        &mut self,
        group: &[RxMessage],
        should_process_truncated: bool,
        now: Instant,
    ) -> bool {
        let first = &group[0];

        let mut metas = Vec::with_capacity(first.questions.len());
        for question_index in 0..first.questions.len() {
            let meta = self.process_question(first, question_index, now);
            metas.push(meta);
        }

        // The random delay is skipped only when every question is answered
        // from unique records we own.
        let mut should_delay = false;
        let mut can_answer = false;
        let mut need_unicast_response = false;
        let mut any_shared = false;

        for (question_index, meta) in metas.iter().enumerate() {
            if !meta.can_answer || !meta.is_unique {
                should_delay = true;
            }
            if meta.can_answer {
                can_answer = true;
                if first.questions[question_index].unicast_response {
                    need_unicast_response = true;
                }
                if matches!(
                    meta.target,
                    QuestionTarget::ServiceType { .. } | QuestionTarget::AllServices
                ) {
                    any_shared = true;
                }
            }
        }

        if !can_answer {
            return false;
        }

        if first.truncated && !should_process_truncated {
            return true;
        }

        let mut answer_time = now;
        if should_delay {
            let max_delay = if any_shared {
                MAX_SHARED_RESPONSE_DELAY
            } else {
                MAX_RESPONSE_DELAY
            };
            answer_time += rand::thread_rng().gen_range(MIN_RESPONSE_DELAY..max_delay);
        }

        for (question_index, meta) in metas.iter().enumerate() {
            self.answer_question(group, question_index, meta, answer_time, now);
        }

        if need_unicast_response {
            self.send_unicast_response(first.sender, now);
        }

        false
    }

    fn process_question(
        &mut self,
        rx_message: &RxMessage,
        question_index: usize,
        now: Instant,
    ) -> QuestionMeta {
        let question = &rx_message.questions[question_index];
        let mut meta = QuestionMeta {
            target: QuestionTarget::None,
            can_answer: false,
            is_unique: false,
        };

        if !question.is_rr_class_internet {
            return meta;
        }

        // The "_services._dns-sd._udp" meta-query for all service types.
        if question.name.matches(None, SERVICES_DNSSD_LABELS) {
            if question_matches(question.rr_type, DnsType::Ptr) && !self.service_types.is_empty() {
                meta.can_answer = true;
                meta.target = QuestionTarget::AllServices;
            }
            return meta;
        }

        if let Some(index) = self
            .hosts
            .iter()
            .position(|host| host.matches_name(&question.name))
        {
            match self.hosts[index].core.state() {
                EntryState::Probing => {
                    if question.is_probe {
                        let ours = self.hosts[index].tiebreak_records();
                        let peer = rx_message.authority_records_for(&question.name);
                        if peer > ours {
                            log::info!(
                                "lost probe tiebreak for {}, holding off",
                                self.hosts[index].name
                            );
                            self.hosts[index].core.hold_and_restart_probing(now);
                        }
                    }
                }
                EntryState::Registered => {
                    meta.can_answer = true;
                    meta.is_unique = true;
                    meta.target = QuestionTarget::Host(index);
                }
                EntryState::Conflict | EntryState::Removing => {}
            }
            return meta;
        }

        if let Some(index) = self
            .services
            .iter()
            .position(|service| service.matches_name(&question.name))
        {
            match self.services[index].core.state() {
                EntryState::Probing => {
                    if question.is_probe {
                        let ours = self.services[index].tiebreak_records();
                        let peer = rx_message.authority_records_for(&question.name);
                        if peer > ours {
                            log::info!(
                                "lost probe tiebreak for {}.{}, holding off",
                                self.services[index].service_instance,
                                self.services[index].service_type
                            );
                            self.services[index].core.hold_and_restart_probing(now);
                        }
                    }
                }
                EntryState::Registered => {
                    meta.can_answer = true;
                    meta.is_unique = true;
                    meta.target = QuestionTarget::Service(index);
                }
                EntryState::Conflict | EntryState::Removing => {}
            }
            return meta;
        }

        // A service type or sub-type question; PTR answers are shared, and
        // several entries may match. The first match is saved, answering
        // continues from there.
        if !question_matches(question.rr_type, DnsType::Ptr) {
            return meta;
        }

        let (sub_label, base_type) = match question.name.sub_type() {
            Some((sub_label, base_type)) => (Some(sub_label.to_string()), base_type),
            None => (None, question.name.clone()),
        };

        for (index, service) in self.services.iter().enumerate() {
            if !service.core.is_registered() || !service.matches_service_type(&base_type) {
                continue;
            }
            if let Some(sub_label) = &sub_label {
                if !service.can_answer_sub_type(sub_label) {
                    continue;
                }
            }

            meta.can_answer = true;
            meta.target = QuestionTarget::ServiceType {
                first_index: index,
                sub_label,
            };
            return meta;
        }

        meta
    }

    fn answer_question(
        &mut self,
        group: &[RxMessage],
        question_index: usize,
        meta: &QuestionMeta,
        answer_time: Instant,
        now: Instant,
    ) {
        if !meta.can_answer {
            return;
        }

        let first = &group[0];
        let question = &first.questions[question_index];
        let info = AnswerInfo {
            question_rr_type: question.rr_type,
            answer_time,
            is_probe: question.is_probe,
            unicast_response: question.unicast_response,
        };

        match &meta.target {
            QuestionTarget::None => {}

            QuestionTarget::Host(index) => {
                let (suppress_addr, suppress_key) = if question.is_probe {
                    (false, false)
                } else {
                    let host = &self.hosts[*index];
                    let suppress_addr = host.addr_record.can_answer()
                        && !host.addresses.is_empty()
                        && host.addresses.iter().all(|address| {
                            group.iter().any(|m| {
                                m.has_known_answer_rdata(
                                    &question.name,
                                    DnsType::Aaaa as u16,
                                    &address.octets(),
                                    host.addr_record.ttl() / 2,
                                )
                            })
                        });
                    let suppress_key = host.core.key_record.can_answer()
                        && group.iter().any(|m| {
                            m.has_known_answer_rdata(
                                &question.name,
                                DnsType::Key as u16,
                                &host.core.key_data,
                                host.core.key_record.ttl() / 2,
                            )
                        });
                    (suppress_addr, suppress_key)
                };

                self.hosts[*index].answer_question(&info, suppress_addr, suppress_key, now);
            }

            QuestionTarget::Service(index) => {
                let (suppress_srv, suppress_txt, suppress_key) = if question.is_probe {
                    (false, false, false)
                } else {
                    let service = &self.services[*index];
                    let suppress_srv = service.srv_record.can_answer()
                        && group.iter().any(|m| {
                            m.has_known_srv_answer(
                                &question.name,
                                service.priority,
                                service.weight,
                                service.port,
                                &service.host_name,
                                service.srv_record.ttl() / 2,
                            )
                        });
                    let suppress_txt = service.txt_record.can_answer()
                        && group.iter().any(|m| {
                            m.has_known_answer_rdata(
                                &question.name,
                                DnsType::Txt as u16,
                                &service.txt_data,
                                service.txt_record.ttl() / 2,
                            )
                        });
                    let suppress_key = service.core.key_record.can_answer()
                        && group.iter().any(|m| {
                            m.has_known_answer_rdata(
                                &question.name,
                                DnsType::Key as u16,
                                &service.core.key_data,
                                service.core.key_record.ttl() / 2,
                            )
                        });
                    (suppress_srv, suppress_txt, suppress_key)
                };

                self.services[*index].answer_service_name_question(
                    &info,
                    suppress_srv,
                    suppress_txt,
                    suppress_key,
                    now,
                );
            }

            QuestionTarget::ServiceType {
                first_index,
                sub_label,
            } => {
                let base_type = match question.name.sub_type() {
                    Some((_, base_type)) => base_type,
                    None => question.name.clone(),
                };

                for index in *first_index..self.services.len() {
                    let matches = {
                        let service = &self.services[index];
                        service.core.is_registered()
                            && service.matches_service_type(&base_type)
                            && sub_label
                                .as_deref()
                                .map_or(true, |sub| service.can_answer_sub_type(sub))
                    };
                    if !matches {
                        continue;
                    }

                    // Known-answer suppression, consolidated across every
                    // packet of a multi-packet query.
                    let suppress = group.iter().any(|m| {
                        m.has_ptr_known_answer(&question.name, |ttl, target| {
                            let service = &self.services[index];
                            target.matches(
                                Some(&service.service_instance),
                                &service.service_type,
                            ) && service.should_suppress_known_answer(ttl, sub_label.as_deref())
                        })
                    });

                    if !suppress {
                        self.services[index].answer_service_type_question(
                            &info,
                            sub_label.as_deref(),
                            now,
                        );
                    }
                }
            }

            QuestionTarget::AllServices => {
                for index in 0..self.service_types.len() {
                    let suppress = group.iter().any(|m| {
                        m.has_ptr_known_answer(&question.name, |ttl, target| {
                            let service_type = &self.service_types[index];
                            service_type.matches_name(target)
                                && service_type.should_suppress_known_answer(ttl)
                        })
                    });

                    if !suppress {
                        self.service_types[index].answer_question(&info, now);
                    }
                }
            }
        }
    }

    /// Processes records of a received response. A record under one of our
    /// registered names with a non-zero TTL and record data differing from
    /// ours means another responder claims the name.
    fn process_rx_response(&mut self, rx_message: &RxMessage, now: Instant) {
        let mut host_conflicts: Vec<usize> = Vec::new();
        let mut service_conflicts: Vec<usize> = Vec::new();

        for section in [Section::Answer, Section::Additional] {
            rx_message.scan_records(section, |name, header, rdata_off| {
                if header.class & CLASS_MASK != CLASS_INTERNET || header.ttl == 0 {
                    return false;
                }

                if let Some(index) = self.hosts.iter().position(|h| h.matches_name(name)) {
                    let rdata = rx_message.record_rdata_canonical(header, rdata_off);
                    let owned = self
                        .hosts[index]
                        .record_data_set()
                        .contains(&(header.rr_type, rdata));
                    if !owned && !host_conflicts.contains(&index) {
                        host_conflicts.push(index);
                    }
                }

                if let Some(index) = self.services.iter().position(|s| s.matches_name(name)) {
                    let rdata = rx_message.record_rdata_canonical(header, rdata_off);
                    let owned = self
                        .services[index]
                        .record_data_set()
                        .contains(&(header.rr_type, rdata));
                    if !owned && !service_conflicts.contains(&index) {
                        service_conflicts.push(index);
                    }
                }

                false
            });
        }

        for index in host_conflicts {
            self.handle_host_conflict(index);
        }
        for index in service_conflicts {
            self.handle_service_conflict(index, now);
        }
    }

    fn handle_host_conflict(&mut self, index: usize) {
        match self.hosts[index].core.state() {
            EntryState::Probing => {
                log::info!("conflict while probing host {}", self.hosts[index].name);
                // Resolves the pending registration with ErrDuplicated, then
                // frees the entry.
                self.hosts[index]
                    .core
                    .set_state_to_conflict(&mut self.event_outs);
                self.hosts[index].core.set_state_to_removing();
            }
            EntryState::Registered => {
                log::info!("conflict for registered host {}", self.hosts[index].name);
                self.hosts[index]
                    .core
                    .set_state_to_conflict(&mut self.event_outs);
                let name = self.hosts[index].name.clone();
                self.event_outs.push_back(ResponderEvent::Conflict(name, None));
            }
            EntryState::Conflict | EntryState::Removing => {}
        }
    }

    fn handle_service_conflict(&mut self, index: usize, now: Instant) {
        match self.services[index].core.state() {
            EntryState::Probing => {
                log::info!(
                    "conflict while probing service {}.{}",
                    self.services[index].service_instance,
                    self.services[index].service_type
                );
                self.services[index]
                    .core
                    .set_state_to_conflict(&mut self.event_outs);
                self.services[index].core.set_state_to_removing();
            }
            EntryState::Registered => {
                log::info!(
                    "conflict for registered service {}.{}",
                    self.services[index].service_instance,
                    self.services[index].service_type
                );
                self.services[index]
                    .core
                    .set_state_to_conflict(&mut self.event_outs);
                update_service_types(&mut self.service_types, &mut self.services[index], now);
                let name = self.services[index].service_instance.clone();
                let service_type = self.services[index].service_type.clone();
                self.event_outs
                    .push_back(ResponderEvent::Conflict(name, Some(service_type)));
            }
            EntryState::Conflict | EntryState::Removing => {}
        }
    }

    /// Builds and queues a unicast response to `dest` from every entry with
    /// a pending unicast answer.
    fn send_unicast_response(&mut self, dest: SocketAddr, now: Instant) {
        let mut tx_message = TxMessage::new_unicast(dest, self.max_message_size);

        for host in &mut self.hosts {
            host.clear_append_state();
        }
        for service in &mut self.services {
            service.clear_append_state();
        }
        for service_type in &mut self.service_types {
            service_type.clear_append_state();
        }

        for index in 0..self.hosts.len() {
            self.prepare_host_response(index, &mut tx_message, now);
        }
        for index in 0..self.services.len() {
            self.prepare_service_response(index, &mut tx_message, now);
        }
        for index in 0..self.service_types.len() {
            self.prepare_service_type_response(index, &mut tx_message, now);
        }

        self.send_tx(tx_message, now);
    }

    // - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
    // Scheduler sweep

    /// Walks all entries, building coalesced probe and response messages for
    /// everything whose fire time has arrived.
    fn handle_entry_timer(&mut self, now: Instant) {
        let mut probe = TxMessage::new(TxMessageType::MulticastProbe, self.max_message_size);
        let mut response = TxMessage::new(TxMessageType::MulticastResponse, self.max_message_size);

        // Host entries are processed before service entries so that host
        // address records already appended to the Answer section are not
        // duplicated into Additional Data.
        for index in 0..self.hosts.len() {
            self.host_handle_timer(index, &mut probe, &mut response, now);
        }
        for index in 0..self.services.len() {
            self.service_handle_timer(index, &mut probe, &mut response, now);
        }
        for index in 0..self.service_types.len() {
            self.service_type_handle_timer(index, &mut response, now);
        }

        self.send_tx(probe, now);
        self.send_tx(response, now);

        self.remove_empty_entries();
    }

    fn host_handle_timer(
        &mut self,
        index: usize,
        probe: &mut TxMessage,
        response: &mut TxMessage,
        now: Instant,
    ) {
        self.hosts[index].clear_append_state();

        if !self.hosts[index].core.fire_time.is_due(now) {
            return;
        }
        self.hosts[index].core.fire_time.clear();

        match self.hosts[index].core.state() {
            EntryState::Probing => {
                if self.hosts[index].core.probe_count < NUM_PROBES {
                    self.hosts[index].core.probe_count += 1;
                    self.hosts[index].core.fire_time.set(now + PROBE_WAIT_TIME);
                    self.prepare_host_probe(index, probe, now);
                } else {
                    self.hosts[index].core.set_registered(&mut self.event_outs);
                    self.hosts[index].start_announcing(now);
                    self.prepare_host_response(index, response, now);
                }
            }
            EntryState::Registered => self.prepare_host_response(index, response, now),
            EntryState::Conflict | EntryState::Removing => return,
        }

        self.hosts[index].determine_next_fire_time(now);
    }

    fn service_handle_timer(
        &mut self,
        index: usize,
        probe: &mut TxMessage,
        response: &mut TxMessage,
        now: Instant,
    ) {
        self.services[index].clear_append_state();

        if !self.services[index].core.fire_time.is_due(now) {
            return;
        }
        self.services[index].core.fire_time.clear();

        match self.services[index].core.state() {
            EntryState::Probing => {
                if self.services[index].core.probe_count < NUM_PROBES {
                    self.services[index].core.probe_count += 1;
                    self.services[index].core.fire_time.set(now + PROBE_WAIT_TIME);
                    self.prepare_service_probe(index, probe, now);
                } else {
                    self.services[index].core.set_registered(&mut self.event_outs);
                    self.services[index].start_announcing(now);
                    update_service_types(&mut self.service_types, &mut self.services[index], now);
                    self.prepare_service_response(index, response, now);
                }
            }
            EntryState::Registered => self.prepare_service_response(index, response, now),
            EntryState::Conflict | EntryState::Removing => return,
        }

        self.services[index].determine_next_fire_time(now);
    }

    fn service_type_handle_timer(&mut self, index: usize, response: &mut TxMessage, now: Instant) {
        self.service_types[index].clear_append_state();

        if !self.service_types[index].fire_time.is_due(now) {
            return;
        }
        self.service_types[index].fire_time.clear();

        self.prepare_service_type_response(index, response, now);

        let service_type = &mut self.service_types[index];
        let mut fire_time = service_type.fire_time;
        service_type.services_ptr.update_fire_time(&mut fire_time, now);
        service_type.fire_time = fire_time;
    }

    fn prepare_host_probe(&mut self, index: usize, tx_message: &mut TxMessage, now: Instant) {
        let mut prepare_again = false;
        loop {
            tx_message.save_current_state();

            let qu_allowed = self.question_unicast_allowed;
            self.hosts[index].prepare_probe_records(tx_message, qu_allowed, now);

            if tx_message.check_size_limit_to_prepare_again(&mut prepare_again) {
                self.clear_append_states(tx_message.get_type());
            }
            if !prepare_again {
                break;
            }
        }
    }

    fn prepare_service_probe(&mut self, index: usize, tx_message: &mut TxMessage, now: Instant) {
        let mut prepare_again = false;
        loop {
            tx_message.save_current_state();

            self.discover_offsets_and_host(index);
            let qu_allowed = self.question_unicast_allowed;
            self.services[index].prepare_probe_records(tx_message, qu_allowed, now);

            if tx_message.check_size_limit_to_prepare_again(&mut prepare_again) {
                self.clear_append_states(tx_message.get_type());
            }
            if !prepare_again {
                break;
            }
        }
    }

    fn prepare_host_response(&mut self, index: usize, tx_message: &mut TxMessage, now: Instant) {
        let mut prepare_again = false;
        loop {
            tx_message.save_current_state();

            self.hosts[index].prepare_response_records(tx_message, now);

            if tx_message.check_size_limit_to_prepare_again(&mut prepare_again) {
                self.clear_append_states(tx_message.get_type());
            }
            if !prepare_again {
                break;
            }
        }

        self.hosts[index].update_records_state(tx_message.get_type(), now);
    }

    fn prepare_service_response(&mut self, index: usize, tx_message: &mut TxMessage, now: Instant) {
        let mut prepare_again = false;
        loop {
            tx_message.save_current_state();

            let host_index = self.discover_offsets_and_host(index);
            {
                let (_, rest) = self.services.split_at_mut(index);
                let entry = &mut rest[0];
                let host = host_index.map(|h| &mut self.hosts[h]);
                entry.prepare_response_records(tx_message, host, now);
            }

            if tx_message.check_size_limit_to_prepare_again(&mut prepare_again) {
                self.clear_append_states(tx_message.get_type());
            }
            if !prepare_again {
                break;
            }
        }

        self.services[index].update_records_state(tx_message.get_type(), now);
    }

    fn prepare_service_type_response(
        &mut self,
        index: usize,
        tx_message: &mut TxMessage,
        now: Instant,
    ) {
        let mut prepare_again = false;
        loop {
            tx_message.save_current_state();

            // Discover the compression offset for the service type name if a
            // service entry already appended it.
            let mut type_offset = UNSPECIFIED_OFFSET;
            for service in &self.services {
                if service.core.is_registered()
                    && self.service_types[index].matches_service_type(&service.service_type)
                    && service.service_type_offset != UNSPECIFIED_OFFSET
                {
                    type_offset = service.service_type_offset;
                    break;
                }
            }

            self.service_types[index].prepare_response_records(tx_message, type_offset, now);

            if tx_message.check_size_limit_to_prepare_again(&mut prepare_again) {
                self.clear_append_states(tx_message.get_type());
            }
            if !prepare_again {
                break;
            }
        }

        self.service_types[index]
            .services_ptr
            .update_state_after_answer(tx_message.get_type(), now);
    }

    /// Discovers the host entry backing service `index` (resolved by name
    /// each build to tolerate registration ordering) and seeds the entry's
    /// compression offsets from entries already appended to this message.
    fn discover_offsets_and_host(&mut self, index: usize) -> Option<usize> {
        let (before, rest) = self.services.split_at_mut(index);
        let entry = &mut rest[0];

        let host_index = self.hosts.iter().position(|host| {
            host.matches_host_name(&entry.host_name) && host.core.state() == entry.core.state()
        });

        if let Some(host_index) = host_index {
            update_compress_offset(&mut entry.host_name_offset, self.hosts[host_index].name_offset);
        }

        for other in before.iter() {
            if other.core.state() != entry.core.state() {
                continue;
            }

            if other.host_name.eq_ignore_ascii_case(&entry.host_name) {
                update_compress_offset(&mut entry.host_name_offset, other.host_name_offset);
            }

            if other.service_type.eq_ignore_ascii_case(&entry.service_type) {
                update_compress_offset(&mut entry.service_type_offset, other.service_type_offset);

                if entry.core.state() == EntryState::Probing {
                    // Sub-type names are not used in probe messages.
                    continue;
                }

                update_compress_offset(
                    &mut entry.sub_service_type_offset,
                    other.sub_service_type_offset,
                );

                for sub in &mut entry.sub_types {
                    if let Some(other_sub) = other
                        .sub_types
                        .iter()
                        .find(|other_sub| other_sub.label.eq_ignore_ascii_case(&sub.label))
                    {
                        update_compress_offset(
                            &mut sub.sub_service_name_offset,
                            other_sub.sub_service_name_offset,
                        );
                    }
                }
            }
        }

        host_index
    }

    /// Clears the append state of entries whose records live in messages of
    /// the given type, after such a message was flushed and restarted.
    fn clear_append_states(&mut self, message_type: TxMessageType) {
        fn should_clear(state: EntryState, message_type: TxMessageType) -> bool {
            match state {
                EntryState::Probing => message_type == TxMessageType::MulticastProbe,
                EntryState::Registered => matches!(
                    message_type,
                    TxMessageType::MulticastResponse | TxMessageType::UnicastResponse
                ),
                EntryState::Conflict | EntryState::Removing => true,
            }
        }

        for host in &mut self.hosts {
            if should_clear(host.core.state(), message_type) {
                host.clear_append_state();
            }
        }
        for service in &mut self.services {
            if should_clear(service.core.state(), message_type) {
                service.clear_append_state();
            }
        }
        if matches!(
            message_type,
            TxMessageType::MulticastResponse | TxMessageType::UnicastResponse
        ) {
            for service_type in &mut self.service_types {
                service_type.clear_append_state();
            }
        }
    }

    fn send_tx(&mut self, mut tx_message: TxMessage, now: Instant) {
        let peer_addr = tx_message.unicast_dest().unwrap_or(MDNS_DEST_ADDR);

        for packet in tx_message.take_packets() {
            self.tx_history.add(&packet, now);

            log::trace!("queuing {} bytes to {peer_addr}", packet.len());
            self.write_outs.push_back(TaggedBytesMut {
                now,
                transport: TransportContext {
                    local_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), MDNS_PORT),
                    peer_addr,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: BytesMut::from(&packet[..]),
            });
        }
    }

    fn remove_empty_entries(&mut self) {
        self.hosts
            .retain(|host| host.core.state() != EntryState::Removing);
        self.services
            .retain(|service| service.core.state() != EntryState::Removing);
        self.service_types
            .retain(|st| st.num_entries > 0 || st.services_ptr.is_present());
    }
}

impl Protocol<TaggedBytesMut, (), ()> for Responder {
    type Rout = ();
    type Wout = TaggedBytesMut;
    type Eout = ResponderEvent;
    type Error = Error;
    type Time = Instant;

    /// Processes an incoming datagram from the mDNS socket.
    ///
    /// Malformed messages are dropped silently; only calling while disabled
    /// is an error.
    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }
        self.handle_message(msg);
        Ok(())
    }

    /// Returns the next packet to transmit: multicast to
    /// [`MDNS_DEST_ADDR`], or unicast to the address in
    /// `transport.peer_addr`.
    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_outs.pop_front()
    }

    /// Returns the next registration or conflict event.
    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.event_outs.pop_front()
    }

    /// Advances entry timers, consolidates due multi-packet queries, builds
    /// outbound messages, and prunes the transmit history.
    fn handle_timeout(&mut self, now: Self::Time) -> Result<()> {
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }

        for group in self.multi_packet.take_due(now) {
            self.process_rx_query(&group.messages, true, now);
            self.remove_empty_entries();
        }

        self.handle_entry_timer(now);
        self.tx_history.prune(now);

        Ok(())
    }

    /// Returns the earliest pending fire time across all entries and
    /// subsystems.
    fn poll_timeout(&mut self) -> Option<Self::Time> {
        if !self.enabled {
            return None;
        }

        let mut earliest: Option<Instant> = None;
        let mut merge = |candidate: Option<Instant>| {
            earliest = match (earliest, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (None, candidate) => candidate,
                (earliest, None) => earliest,
            };
        };

        for host in &self.hosts {
            merge(host.core.fire_time.get());
        }
        for service in &self.services {
            merge(service.core.fire_time.get());
        }
        for service_type in &self.service_types {
            merge(service_type.fire_time.get());
        }
        merge(self.multi_packet.next_time());
        merge(self.tx_history.next_expire_time());

        earliest
    }

    /// Disables the responder, dropping all entries and queued output.
    fn close(&mut self) -> Result<()> {
        if self.enabled {
            let _ = self.set_enabled(false, Instant::now());
        }
        Ok(())
    }
}

pub(crate) fn determine_ttl(ttl: u32, default_ttl: u32) -> u32 {
    if ttl == 0 {
        default_ttl
    } else {
        ttl
    }
}

fn update_compress_offset(offset: &mut u16, new_offset: u16) {
    if *offset == UNSPECIFIED_OFFSET && new_offset != UNSPECIFIED_OFFSET {
        *offset = new_offset;
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && label.len() <= MAX_LABEL_LEN
}

fn is_valid_service_type(service_type: &str) -> bool {
    !service_type.is_empty()
        && service_type
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN)
}
