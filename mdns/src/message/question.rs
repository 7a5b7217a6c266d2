use super::name::WireName;
use super::packer::*;
use shared::error::Result;

/// A question read from the wire.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Question {
    pub(crate) name: WireName,
    pub(crate) typ: u16,
    pub(crate) class: u16,
}

impl Question {
    /// Reads a question at `off`, returning it and the offset just past it.
    pub(crate) fn read_from(msg: &[u8], off: usize) -> Result<(Question, usize)> {
        let (name, off) = WireName::read_from(msg, off)?;
        let (typ, off) = unpack_uint16(msg, off)?;
        let (class, off) = unpack_uint16(msg, off)?;
        Ok((Question { name, typ, class }, off))
    }
}
