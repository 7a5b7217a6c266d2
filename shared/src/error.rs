use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("module is not enabled")]
    ErrInvalidState,
    #[error("already in the requested state")]
    ErrAlready,
    #[error("name is claimed by another responder")]
    ErrDuplicated,
    #[error("no buffer space available")]
    ErrNoBufs,
    #[error("failed to parse message")]
    ErrParse,
    #[error("message is not supported")]
    ErrNotCapable,
    #[error("unexpected end of message")]
    ErrUnexpectedEnd,
    #[error("dns label exceeds 63 bytes")]
    ErrLabelTooLong,
    #[error("dns name exceeds 255 bytes")]
    ErrNameTooLong,
    #[error("dns name is malformed")]
    ErrInvalidName,
    #[error("record data exceeds 65535 bytes")]
    ErrRecordTooLong,
    #[error("too many records in section")]
    ErrTooManyRecords,
    #[error("compression pointer does not point backwards")]
    ErrBadPointer,
    #[error("entry not found")]
    ErrNotFound,
}
