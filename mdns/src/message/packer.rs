use shared::error::{Error, Result};

// Big-endian integer append/read helpers shared by the codec.

pub(crate) fn pack_uint16(msg: &mut Vec<u8>, v: u16) {
    msg.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn pack_uint32(msg: &mut Vec<u8>, v: u32) {
    msg.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn unpack_uint16(msg: &[u8], off: usize) -> Result<(u16, usize)> {
    if off + 2 > msg.len() {
        return Err(Error::ErrUnexpectedEnd);
    }
    Ok((u16::from_be_bytes([msg[off], msg[off + 1]]), off + 2))
}

pub(crate) fn unpack_uint32(msg: &[u8], off: usize) -> Result<(u32, usize)> {
    if off + 4 > msg.len() {
        return Err(Error::ErrUnexpectedEnd);
    }
    Ok((
        u32::from_be_bytes([msg[off], msg[off + 1], msg[off + 2], msg[off + 3]]),
        off + 4,
    ))
}

// Backpatches a uint16 at a known offset, used to fix up header counts and
// record data lengths once their final values are known.
pub(crate) fn write_uint16_at(msg: &mut [u8], off: usize, v: u16) {
    let bytes = v.to_be_bytes();
    msg[off] = bytes[0];
    msg[off + 1] = bytes[1];
}
