//! SQL identifier validation for configurable table names.
//!
//! Provider deployments name their message tables differently, so the
//! source readers accept a table override. Table names cannot be bound as
//! query parameters, which makes this check the injection barrier.

use harbor_core::{Error, Result};

/// Validate a PostgreSQL table identifier.
///
/// Must be non-empty, at most 63 characters (the PostgreSQL identifier
/// limit), start with a letter or underscore, and contain only
/// alphanumerics and underscores.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("table name cannot be empty".to_string()));
    }
    if name.len() > 63 {
        return Err(Error::Config(format!(
            "table name exceeds 63 character limit: {} characters",
            name.len()
        )));
    }
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(Error::Config(format!(
                "table name must start with a letter or underscore, found: '{}'",
                first
            )));
        }
    }
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(Error::Config(format!(
                "table name contains invalid character: '{}'",
                ch
            )));
        }
    }
    Ok(())
}
