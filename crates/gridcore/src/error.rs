use thiserror::Error;

/// Errors raised by grid layout, node construction and topology parsing.
///
/// Binary decoding of populations reports `std::io::Error` instead, matching
/// the rest of the byte-level readers in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("subdivision rule for level {level} must be at least 1x1, got {width}x{height}")]
    InvalidRule { level: usize, width: u32, height: u32 },

    #[error("grid layout needs at least one subdivision rule")]
    EmptyRules,

    #[error("cell count at level {level} overflows u32")]
    LevelOverflow { level: usize },

    #[error("level {level} out of range (max level {max_level})")]
    LevelOutOfRange { level: u8, max_level: u8 },

    #[error("global id {global_id} out of range for level {level}")]
    GlobalIdOutOfRange { level: u8, global_id: u32 },

    #[error("levels ({levels}) and global ids ({global_ids}) differ in length")]
    LengthMismatch { levels: usize, global_ids: usize },

    #[error("no converter from {src} to {target}")]
    UnsupportedConversion { src: String, target: String },

    #[error("malformed edge key '{0}'")]
    MalformedEdgeKey(String),
}
