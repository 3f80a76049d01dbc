use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("APDU of {len} bytes does not fit the {max} byte length field")]
    ApduTooLarge { len: usize, max: usize },
    #[error("a transmission is already in flight")]
    SendInProgress,
    #[error("link closed")]
    LinkClosed,
    #[error("unexpected {0} reply")]
    UnexpectedReply(crate::chunk::Tag),
    #[error("response abandoned at seq={sequence}")]
    ResponseAborted { sequence: u16 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = TransportError> = core::result::Result<T, E>;
