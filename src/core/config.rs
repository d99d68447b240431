//! Allocator configuration
//!
//! ```toml
//! cidr = "10.96.0.0/12"
//! key = "/ranges/serviceips"
//! resource = "serviceipallocations"
//!
//! [retry]
//! max_attempts = 10
//! initial_backoff_ms = 1
//! max_backoff_ms = 128
//! ```

use crate::error::Result;
use crate::persistence::{DEFAULT_KEY, DEFAULT_RESOURCE};
use crate::range::Range;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Settings for one range allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AllocatorConfig {
    /// Range to allocate from, e.g. `192.168.1.0/24`
    pub cidr: String,

    /// Store key holding the allocation record
    #[serde(default = "default_key")]
    #[validate(custom(function = "crate::validation::validate_key_field"))]
    pub key: String,

    /// Resource name used in error messages
    #[serde(default = "default_resource")]
    #[validate(custom(function = "crate::validation::validate_resource_field"))]
    pub resource: String,

    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryPolicy,
}

fn default_key() -> String {
    DEFAULT_KEY.to_string()
}

fn default_resource() -> String {
    DEFAULT_RESOURCE.to_string()
}

impl AllocatorConfig {
    /// Configuration with defaults for everything except the range
    pub fn new(cidr: impl Into<String>) -> Self {
        AllocatorConfig {
            cidr: cidr.into(),
            key: default_key(),
            resource: default_resource(),
            retry: RetryPolicy::default(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: AllocatorConfig = toml::from_str(source)?;
        config.check()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Validate every field and return the parsed range
    pub fn check(&self) -> Result<Range> {
        self.validate()?;
        Range::parse(&self.cidr)
    }
}
