//! Shared helpers for the IdLE workspace: canonical JSON, credential redaction, and
//! configuration path handling.

pub mod canonical;
pub mod path_processing;
pub mod redaction;

pub use canonical::{canonical_json, sort_keys};
pub use path_processing::expand_tilde;
pub use redaction::{REDACTED, is_sensitive_key, redact_sensitive, redact_sensitive_values};
