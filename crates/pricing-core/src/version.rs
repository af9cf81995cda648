//! Version-string codec for storage
//!
//! Pricing version strings contain dots (`1.0.0`), which the document
//! store cannot use inside mapping keys. Stores escape versions on write
//! and unescape on read with this codec.
//!
//! Known limitation: a literal underscore in a user-supplied version is
//! indistinguishable from an escaped dot, so `1_0` unescapes to `1.0`.
//! This mirrors the behavior of the persistence layer this codec was
//! extracted from and is intentionally left unchanged.

/// Separator used in place of `.` in storage keys.
const SAFE_SEPARATOR: char = '_';

/// Escape a version string for use as a storage key.
///
/// # Examples
///
/// ```
/// use pricing_core::escape_version;
///
/// assert_eq!(escape_version("1.0.0"), "1_0_0");
/// ```
pub fn escape_version(version: &str) -> String {
    version.replace('.', &SAFE_SEPARATOR.to_string())
}

/// Unescape a storage key back into a version string.
///
/// # Examples
///
/// ```
/// use pricing_core::unescape_version;
///
/// assert_eq!(unescape_version("1_0_0"), "1.0.0");
/// ```
pub fn unescape_version(escaped: &str) -> String {
    escaped.replace(SAFE_SEPARATOR, ".")
}
