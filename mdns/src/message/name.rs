use std::fmt;

use shared::error::{Error, Result};

pub(crate) const MAX_LABEL_LEN: usize = 63;
pub(crate) const MAX_NAME_LEN: usize = 255;

pub(crate) const LOCAL_DOMAIN: &str = "local";

const POINTER_MASK: u8 = 0xc0;

/// Appends a single DNS label. The label may contain dot characters, which
/// is allowed in service instance labels.
pub(crate) fn append_label(msg: &mut Vec<u8>, label: &str) -> Result<()> {
    let bytes = label.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_LABEL_LEN {
        return Err(Error::ErrLabelTooLong);
    }
    msg.push(bytes.len() as u8);
    msg.extend_from_slice(bytes);
    Ok(())
}

/// Appends dot-separated labels, without a terminating zero byte.
pub(crate) fn append_multiple_labels(msg: &mut Vec<u8>, labels: &str) -> Result<()> {
    for label in labels.split('.') {
        if label.is_empty() {
            continue;
        }
        append_label(msg, label)?;
    }
    Ok(())
}

/// Appends the zero byte terminating a name.
pub(crate) fn append_terminator(msg: &mut Vec<u8>) {
    msg.push(0);
}

/// Appends a two-byte compression pointer to a previously-written name.
pub(crate) fn append_pointer(msg: &mut Vec<u8>, offset: u16) -> Result<()> {
    if offset >= 0x4000 {
        return Err(Error::ErrBadPointer);
    }
    msg.push(POINTER_MASK | (offset >> 8) as u8);
    msg.push((offset & 0xff) as u8);
    Ok(())
}

/// Skips over a (possibly compressed) name, returning the offset of the
/// field that follows it.
pub(crate) fn skip_name(msg: &[u8], mut off: usize) -> Result<usize> {
    loop {
        let len = *msg.get(off).ok_or(Error::ErrUnexpectedEnd)?;
        if len == 0 {
            return Ok(off + 1);
        }
        if len & POINTER_MASK == POINTER_MASK {
            if off + 2 > msg.len() {
                return Err(Error::ErrUnexpectedEnd);
            }
            return Ok(off + 2);
        }
        if len & POINTER_MASK != 0 {
            return Err(Error::ErrInvalidName);
        }
        off += 1 + len as usize;
        if off > msg.len() {
            return Err(Error::ErrUnexpectedEnd);
        }
    }
}

/// A name read from the wire, canonicalized to lowercase labels.
///
/// Keeping the labels separate (rather than a joined string) preserves label
/// boundaries for labels that themselves contain dot characters, which
/// service instance labels are allowed to do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct WireName {
    labels: Vec<String>,
}

impl WireName {
    /// Reads a name at `off`, chasing compression pointers. Returns the name
    /// and the offset just past the name in the original byte stream.
    pub(crate) fn read_from(msg: &[u8], off: usize) -> Result<(WireName, usize)> {
        let mut labels = Vec::new();
        let mut pos = off;
        let mut end_off = None;
        let mut total_len = 0usize;

        loop {
            let len = *msg.get(pos).ok_or(Error::ErrUnexpectedEnd)?;

            if len == 0 {
                let end = end_off.unwrap_or(pos + 1);
                return Ok((WireName { labels }, end));
            }

            if len & POINTER_MASK == POINTER_MASK {
                if pos + 2 > msg.len() {
                    return Err(Error::ErrUnexpectedEnd);
                }
                let target = ((u16::from(len & !POINTER_MASK)) << 8) | u16::from(msg[pos + 1]);
                // A pointer must point strictly backwards, which also rules
                // out pointer cycles.
                if target as usize >= pos {
                    return Err(Error::ErrBadPointer);
                }
                if end_off.is_none() {
                    end_off = Some(pos + 2);
                }
                pos = target as usize;
                continue;
            }

            if len & POINTER_MASK != 0 {
                return Err(Error::ErrInvalidName);
            }

            let start = pos + 1;
            let end = start + len as usize;
            if end > msg.len() {
                return Err(Error::ErrUnexpectedEnd);
            }
            total_len += 1 + len as usize;
            if total_len > MAX_NAME_LEN {
                return Err(Error::ErrNameTooLong);
            }

            // Labels are UTF-8 (RFC 6762 section 16), canonicalized to
            // ASCII lowercase.
            let mut label_bytes = msg[start..end].to_vec();
            label_bytes.make_ascii_lowercase();
            labels.push(String::from_utf8_lossy(&label_bytes).into_owned());
            pos = end;
        }
    }

    pub(crate) fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Matches this name against `[first_label.]<middle_labels>.local.`,
    /// case-insensitively. `first_label` is compared as a single label (it
    /// may contain dots); `middle_labels` is dot-separated.
    pub(crate) fn matches(&self, first_label: Option<&str>, middle_labels: &str) -> bool {
        let mut idx = 0;

        if let Some(first) = first_label {
            match self.labels.get(idx) {
                Some(label) if label.eq_ignore_ascii_case(first) => idx += 1,
                _ => return false,
            }
        }

        for part in middle_labels.split('.') {
            if part.is_empty() {
                continue;
            }
            match self.labels.get(idx) {
                Some(label) if label.eq_ignore_ascii_case(part) => idx += 1,
                _ => return false,
            }
        }

        self.labels.len() == idx + 1 && self.labels[idx] == LOCAL_DOMAIN
    }

    /// Splits `<sub>._sub.<service-type>.local.` into the sub-type label and
    /// the base service type name.
    pub(crate) fn sub_type(&self) -> Option<(&str, WireName)> {
        if self.labels.len() < 3 || self.labels[1] != "_sub" {
            return None;
        }
        let base = WireName {
            labels: self.labels[2..].to_vec(),
        };
        Some((self.labels[0].as_str(), base))
    }
}

impl fmt::Display for WireName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.labels {
            write!(f, "{label}.")?;
        }
        Ok(())
    }
}
