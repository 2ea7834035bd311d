use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index record truncated or malformed")]
    CorruptIndex,

    #[error("index entry references a data file that is missing or unreadable")]
    MissingDataFile,

    #[error("tile codec error: {0}")]
    Codec(#[from] tilecoord_codec::CodecError),

    #[error("tile payload had the wrong length")]
    WrongPayloadLength,
}
