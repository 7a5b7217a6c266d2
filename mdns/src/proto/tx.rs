use std::net::SocketAddr;

use crate::message::name;
use crate::message::records;
use crate::message::{DnsType, Header, RecordCounts, Section, HEADER_LEN};

/// A compression offset value meaning "name not appended yet".
pub(crate) const UNSPECIFIED_OFFSET: u16 = 0;

pub(crate) const UDP_SERVICE_LABEL: &str = "_udp";
pub(crate) const TCP_SERVICE_LABEL: &str = "_tcp";
pub(crate) const SUB_SERVICE_LABEL: &str = "_sub";
pub(crate) const SERVICES_DNSSD_LABELS: &str = "_services._dns-sd._udp";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TxMessageType {
    MulticastProbe,
    MulticastQuery,
    MulticastResponse,
    UnicastResponse,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum AppendOutcome {
    AppendedFullNameAsCompressed,
    AppendedLabels,
}

/// Builder for one logical outbound message.
///
/// The Authority and Additional Data sections are built in side buffers and
/// appended behind the main buffer (header, questions, answers) when the
/// message is finalized. Compression offsets are therefore only saved for
/// names first written into the main buffer, whose offsets are stable.
///
/// When the configured size limit is exceeded, the builder restores the last
/// saved state, finalizes what fits into `flushed`, and starts a fresh
/// message so the caller can re-append the current entry.
pub(crate) struct TxMessage {
    typ: TxMessageType,
    max_size: u16,
    msg: Vec<u8>,
    authority: Vec<u8>,
    additional: Vec<u8>,
    record_counts: RecordCounts,
    saved_record_counts: RecordCounts,
    saved_msg_len: usize,
    saved_authority_len: usize,
    saved_additional_len: usize,
    domain_offset: u16,
    udp_offset: u16,
    tcp_offset: u16,
    services_dnssd_offset: u16,
    unicast_dest: Option<SocketAddr>,
    flushed: Vec<Vec<u8>>,
}

impl TxMessage {
    pub(crate) fn new(typ: TxMessageType, max_size: u16) -> Self {
        Self {
            typ,
            max_size,
            msg: vec![0; HEADER_LEN],
            authority: Vec::new(),
            additional: Vec::new(),
            record_counts: RecordCounts::default(),
            saved_record_counts: RecordCounts::default(),
            saved_msg_len: HEADER_LEN,
            saved_authority_len: 0,
            saved_additional_len: 0,
            domain_offset: UNSPECIFIED_OFFSET,
            udp_offset: UNSPECIFIED_OFFSET,
            tcp_offset: UNSPECIFIED_OFFSET,
            services_dnssd_offset: UNSPECIFIED_OFFSET,
            unicast_dest: None,
            flushed: Vec::new(),
        }
    }

    pub(crate) fn new_unicast(dest: SocketAddr, max_size: u16) -> Self {
        let mut tx = Self::new(TxMessageType::UnicastResponse, max_size);
        tx.unicast_dest = Some(dest);
        tx
    }

    pub(crate) fn get_type(&self) -> TxMessageType {
        self.typ
    }

    pub(crate) fn unicast_dest(&self) -> Option<SocketAddr> {
        self.unicast_dest
    }

    fn buffer_mut(&mut self, section: Section) -> &mut Vec<u8> {
        match section {
            Section::Question | Section::Answer => &mut self.msg,
            Section::Authority => &mut self.authority,
            Section::Additional => &mut self.additional,
        }
    }

    // Offsets are saved only for names written into the main buffer; names
    // in the side buffers shift when the main buffer grows, so they are
    // never used as compression targets.
    fn save_offset(&self, section: Section) -> u16 {
        match section {
            Section::Question | Section::Answer => self.msg.len() as u16,
            Section::Authority | Section::Additional => UNSPECIFIED_OFFSET,
        }
    }

    /// Appends a single label (which may itself contain dots), compressed
    /// against `compress_offset` when one is known.
    pub(crate) fn append_label(
        &mut self,
        section: Section,
        label: &str,
        compress_offset: &mut u16,
    ) -> AppendOutcome {
        let (outcome, new_offset) = self.append_labels(section, label, true, *compress_offset);
        *compress_offset = new_offset;
        outcome
    }

    /// Appends dot-separated labels, compressed against `compress_offset`
    /// when one is known.
    pub(crate) fn append_multiple_labels(
        &mut self,
        section: Section,
        labels: &str,
        compress_offset: &mut u16,
    ) -> AppendOutcome {
        let (outcome, new_offset) = self.append_labels(section, labels, false, *compress_offset);
        *compress_offset = new_offset;
        outcome
    }

    fn append_labels(
        &mut self,
        section: Section,
        labels: &str,
        is_single_label: bool,
        compress_offset: u16,
    ) -> (AppendOutcome, u16) {
        if compress_offset != UNSPECIFIED_OFFSET {
            let buffer = self.buffer_mut(section);
            let appended = name::append_pointer(buffer, compress_offset);
            debug_assert!(appended.is_ok());
            return (AppendOutcome::AppendedFullNameAsCompressed, compress_offset);
        }

        let new_offset = self.save_offset(section);
        let buffer = self.buffer_mut(section);
        let result = if is_single_label {
            name::append_label(buffer, labels)
        } else {
            name::append_multiple_labels(buffer, labels)
        };
        debug_assert!(result.is_ok());

        (AppendOutcome::AppendedLabels, new_offset)
    }

    /// Appends a service type name (e.g. `_http._tcp`) followed by the
    /// domain, sharing the `_udp`/`_tcp` suffix offsets across the build.
    pub(crate) fn append_service_type(
        &mut self,
        section: Section,
        service_type: &str,
        compress_offset: &mut u16,
    ) {
        let (labels, protocol) =
            if let Some(rest) = split_service_suffix(service_type, UDP_SERVICE_LABEL) {
                (rest, Some(UDP_SERVICE_LABEL))
            } else if let Some(rest) = split_service_suffix(service_type, TCP_SERVICE_LABEL) {
                (rest, Some(TCP_SERVICE_LABEL))
            } else {
                (service_type, None)
            };

        let outcome = self.append_multiple_labels(section, labels, compress_offset);
        if outcome == AppendOutcome::AppendedFullNameAsCompressed {
            return;
        }

        if let Some(protocol_label) = protocol {
            let mut offset = if protocol_label == UDP_SERVICE_LABEL {
                self.udp_offset
            } else {
                self.tcp_offset
            };
            let outcome = self.append_label(section, protocol_label, &mut offset);
            if protocol_label == UDP_SERVICE_LABEL {
                self.udp_offset = offset;
            } else {
                self.tcp_offset = offset;
            }
            if outcome == AppendOutcome::AppendedFullNameAsCompressed {
                return;
            }
        }

        self.append_domain_name(section);
    }

    /// Appends the domain name `local.`, shared across the whole build.
    pub(crate) fn append_domain_name(&mut self, section: Section) {
        if self.domain_offset != UNSPECIFIED_OFFSET {
            let offset = self.domain_offset;
            let buffer = self.buffer_mut(section);
            let appended = name::append_pointer(buffer, offset);
            debug_assert!(appended.is_ok());
            return;
        }

        self.domain_offset = self.save_offset(section);
        let buffer = self.buffer_mut(section);
        let appended = name::append_label(buffer, name::LOCAL_DOMAIN);
        debug_assert!(appended.is_ok());
        name::append_terminator(buffer);
    }

    /// Appends `_services._dns-sd._udp.local.` for meta-query answers.
    pub(crate) fn append_services_dnssd_name(&mut self, section: Section) {
        if self.services_dnssd_offset != UNSPECIFIED_OFFSET {
            let offset = self.services_dnssd_offset;
            let buffer = self.buffer_mut(section);
            let appended = name::append_pointer(buffer, offset);
            debug_assert!(appended.is_ok());
            return;
        }

        self.services_dnssd_offset = self.save_offset(section);
        let buffer = self.buffer_mut(section);
        let appended = name::append_multiple_labels(buffer, SERVICES_DNSSD_LABELS);
        debug_assert!(appended.is_ok());
        self.append_domain_name(section);
    }

    /// Appends the fixed fields of a question (type and class).
    pub(crate) fn append_question_fields(&mut self, rr_type: DnsType, class: u16) {
        let buffer = self.buffer_mut(Section::Question);
        crate::message::packer::pack_uint16(buffer, rr_type as u16);
        crate::message::packer::pack_uint16(buffer, class);
        self.record_counts.increment(Section::Question);
    }

    /// Appends the fixed record fields with a placeholder data length;
    /// returns the offset to backpatch with [`patch_rdlength`](Self::patch_rdlength).
    pub(crate) fn append_record_header(
        &mut self,
        section: Section,
        rr_type: DnsType,
        class: u16,
        ttl: u32,
    ) -> usize {
        let buffer = self.buffer_mut(section);
        records::append_record_header(buffer, rr_type, class, ttl)
    }

    pub(crate) fn append_rdata(&mut self, section: Section, data: &[u8]) {
        self.buffer_mut(section).extend_from_slice(data);
    }

    pub(crate) fn append_rdata_u16(&mut self, section: Section, value: u16) {
        crate::message::packer::pack_uint16(self.buffer_mut(section), value);
    }

    pub(crate) fn patch_rdlength(&mut self, section: Section, len_off: usize) {
        let buffer = self.buffer_mut(section);
        let patched = records::patch_rdlength(buffer, len_off);
        debug_assert!(patched.is_ok());
    }

    pub(crate) fn increment_record_count(&mut self, section: Section) {
        self.record_counts.increment(section);
    }

    pub(crate) fn save_current_state(&mut self) {
        self.saved_record_counts = self.record_counts;
        self.saved_msg_len = self.msg.len();
        self.saved_authority_len = self.authority.len();
        self.saved_additional_len = self.additional.len();
    }

    pub(crate) fn restore_to_saved_state(&mut self) {
        self.record_counts = self.saved_record_counts;
        self.msg.truncate(self.saved_msg_len);
        self.authority.truncate(self.saved_authority_len);
        self.additional.truncate(self.saved_additional_len);
    }

    fn is_over_size_limit(&self) -> bool {
        self.msg.len() + self.authority.len() + self.additional.len() > self.max_size as usize
    }

    /// Manages the size limit: when the message exceeds it, restores the
    /// previously saved state, finalizes what fits, and starts a fresh
    /// message. Returns `true` when a flush happened, in which case the
    /// caller must clear the append state of related entries and, with
    /// `prepare_again` set, re-append the current entry's records.
    ///
    /// Re-preparing happens at most once: an entry whose own records exceed
    /// the size limit is kept in one over-sized message.
    pub(crate) fn check_size_limit_to_prepare_again(&mut self, prepare_again: &mut bool) -> bool {
        if *prepare_again {
            *prepare_again = false;
            return false;
        }

        if !self.is_over_size_limit() {
            return false;
        }

        *prepare_again = true;
        self.restore_to_saved_state();
        self.flush();
        true
    }

    fn flush(&mut self) {
        if let Some(packet) = self.finalize(true) {
            self.flushed.push(packet);
        }
        self.reinit();
    }

    // Glues the sections behind the header. `split` marks a message flushed
    // due to the size limit; probes then carry the Truncated bit, responses
    // are split into independent messages instead.
    fn finalize(&mut self, split: bool) -> Option<Vec<u8>> {
        if self.record_counts.is_empty() {
            return None;
        }

        let mut header = Header::default();
        match self.typ {
            TxMessageType::MulticastProbe | TxMessageType::MulticastQuery => {}
            TxMessageType::MulticastResponse | TxMessageType::UnicastResponse => {
                header.response = true;
                header.authoritative = true;
            }
        }
        if split && self.typ == TxMessageType::MulticastProbe {
            header.truncated = true;
        }
        self.record_counts.write_to(&mut header);

        let mut packet = std::mem::take(&mut self.msg);
        header.write_to(&mut packet);
        packet.extend_from_slice(&self.authority);
        packet.extend_from_slice(&self.additional);
        Some(packet)
    }

    fn reinit(&mut self) {
        self.msg = vec![0; HEADER_LEN];
        self.authority.clear();
        self.additional.clear();
        self.record_counts.clear();
        self.saved_record_counts = RecordCounts::default();
        self.saved_msg_len = HEADER_LEN;
        self.saved_authority_len = 0;
        self.saved_additional_len = 0;
        self.domain_offset = UNSPECIFIED_OFFSET;
        self.udp_offset = UNSPECIFIED_OFFSET;
        self.tcp_offset = UNSPECIFIED_OFFSET;
        self.services_dnssd_offset = UNSPECIFIED_OFFSET;
    }

    /// Takes every finalized packet of this message, earlier flushes first.
    pub(crate) fn take_packets(&mut self) -> Vec<Vec<u8>> {
        let mut packets = std::mem::take(&mut self.flushed);
        if let Some(packet) = self.finalize(false) {
            packets.push(packet);
        }
        self.reinit();
        packets
    }
}

// Strips a trailing `.<suffix_label>` from a service type, matching
// case-insensitively.
fn split_service_suffix<'a>(service_type: &'a str, suffix_label: &str) -> Option<&'a str> {
    let head_len = service_type.len().checked_sub(suffix_label.len() + 1)?;
    let (head, tail) = service_type.split_at(head_len);
    let tail_label = tail.strip_prefix('.')?;
    if tail_label.eq_ignore_ascii_case(suffix_label) {
        Some(head)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_service_suffix() {
        assert_eq!(split_service_suffix("_http._tcp", "_tcp"), Some("_http"));
        assert_eq!(split_service_suffix("_tst._udp", "_udp"), Some("_tst"));
        assert_eq!(split_service_suffix("_tst._udp", "_tcp"), None);
        assert_eq!(split_service_suffix("_udp", "_udp"), None);
        assert_eq!(split_service_suffix("_a._b._UDP", "_udp"), Some("_a._b"));
    }
}
