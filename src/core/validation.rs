//! Validation for store keys and resource names
//!
//! Keys address allocation records in the backing store and are shared by
//! every allocator instance pointed at the same range, so they are checked
//! up front rather than discovered as store errors later.

use crate::error::{AllocatorError, Result};
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use validator::ValidationError;

/// Validated store key such as `/ranges/serviceips`
///
/// # Rules
/// - Starts with `/`
/// - Segments of ASCII letters, digits, `.`, `_` and `-`
/// - No empty, `.` or `..` segments, no trailing slash
/// - At most 512 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey(String);

impl StoreKey {
    const PATTERN: &'static str = r"^(/[A-Za-z0-9._-]+)+$";

    const MAX_LENGTH: usize = 512;

    /// Create a new validated key
    ///
    /// # Examples
    ///
    /// ```
    /// use ipalloc_rs::validation::StoreKey;
    ///
    /// let key = StoreKey::new("/ranges/serviceips").unwrap();
    /// assert_eq!(key.as_str(), "/ranges/serviceips");
    ///
    /// assert!(StoreKey::new("ranges/serviceips").is_err()); // relative
    /// assert!(StoreKey::new("/ranges//serviceips").is_err()); // empty segment
    /// ```
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(StoreKey(key))
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(AllocatorError::InvalidKey("key cannot be empty".to_string()));
        }

        if key.len() > Self::MAX_LENGTH {
            return Err(AllocatorError::InvalidKey(format!(
                "key too long (max {} bytes)",
                Self::MAX_LENGTH
            )));
        }

        let re = Regex::new(Self::PATTERN)
            .map_err(|e| AllocatorError::InvalidKey(format!("key pattern: {}", e)))?;
        if !re.is_match(key) {
            return Err(AllocatorError::InvalidKey(format!(
                "key '{}' must be an absolute path of [A-Za-z0-9._-] segments",
                key
            )));
        }

        if key.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(AllocatorError::InvalidKey(format!(
                "key '{}' cannot contain relative segments",
                key
            )));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate a resource name (lowercase DNS label, 1-63 characters)
///
/// The name shows up in `Uninitialized` errors, e.g. `serviceipallocations`.
pub fn validate_resource(name: &str) -> Result<()> {
    let re = Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")
        .map_err(|e| AllocatorError::InvalidConfig(format!("resource pattern: {}", e)))?;
    if !re.is_match(name) {
        return Err(AllocatorError::InvalidConfig(format!(
            "resource '{}' must be a lowercase DNS label",
            name
        )));
    }
    Ok(())
}

/// `validator` adapter for key fields
pub fn validate_key_field(key: &str) -> std::result::Result<(), ValidationError> {
    StoreKey::validate_key(key).map_err(|e| field_error("store_key", e))
}

/// `validator` adapter for resource fields
pub fn validate_resource_field(name: &str) -> std::result::Result<(), ValidationError> {
    validate_resource(name).map_err(|e| field_error("resource", e))
}

fn field_error(code: &'static str, err: AllocatorError) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Owned(err.to_string()));
    error
}
