//! Storage key templates and upload invariants.
//!
//! Keys are `/`-separated logical paths relative to the blob store root. Derived
//! keys depend only on the operation and the original's file name, so writing the
//! same derivation twice overwrites rather than accumulates.

use uuid::Uuid;

use super::error::DomainError;
use super::types::Operation;

/// Root under which uploaded originals are stored.
pub const ORIGINAL_PREFIX: &str = "original";

/// Root under which derived images are stored, one directory per operation.
pub const PROCESSED_PREFIX: &str = "processed";

/// Extensions accepted for upload, lower-case with a leading dot.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".png", ".gif"];

/// Normalise a caller-supplied extension and check it against [`ALLOWED_EXTENSIONS`].
///
/// A leading dot is optional and matching is case-insensitive; the returned value is
/// always lower-case with a leading dot.
pub fn normalize_extension(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(DomainError::MissingExtension);
    }

    let candidate = format!(".{}", trimmed.to_ascii_lowercase());
    if ALLOWED_EXTENSIONS.contains(&candidate.as_str()) {
        Ok(candidate)
    } else {
        Err(DomainError::extension_not_allowed(raw.trim()))
    }
}

/// `original/<id><extension>`
pub fn original_path(id: Uuid, extension: &str) -> String {
    format!("{ORIGINAL_PREFIX}/{id}{extension}")
}

/// `processed/<operation>/<base filename of original>`
pub fn derived_path(operation: Operation, original_path: &str) -> String {
    format!(
        "{PROCESSED_PREFIX}/{}/{}",
        operation.as_str(),
        base_filename(original_path)
    )
}

/// Last non-empty segment of a `/`-separated key.
pub fn base_filename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(path)
}
