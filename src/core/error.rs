use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Address {address} is not in the range {range}")]
    NotInRange { address: IpAddr, range: String },

    #[error("cannot allocate resources of type {resource} at this time (no allocation record at {key})")]
    Uninitialized { resource: String, key: String },

    #[error("provided IP is already allocated: {address} (record {key})")]
    AlreadyAllocated { address: IpAddr, key: String },

    #[error("range is full: {range} (record {key})")]
    Exhausted { range: String, key: String },

    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    Conflict { key: String, expected: u64, actual: u64 },

    #[error("Too much contention on {key}: gave up after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    #[error("Range mismatch at {key}: allocator configured for {expected}, record holds {found}")]
    RangeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Corrupt allocation record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl AllocatorError {
    /// Only version conflicts are worth another read-modify-write cycle.
    /// Everything else yields the same outcome on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocatorError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, AllocatorError>;
