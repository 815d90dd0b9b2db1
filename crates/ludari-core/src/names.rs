//! Job-name and replica-identifier rules.
//!
//! Names beginning with `__`, `system:`, or `internal:` are reserved for the
//! engine; the watch job `__watch__` is the only one the engine itself
//! creates.

/// The system-owned job that provides the periodic reset-detection tick.
pub const WATCH_JOB_NAME: &str = "__watch__";

/// Prefixes reserved for system-owned jobs.
const RESERVED_PREFIXES: &[&str] = &["__", "system:", "internal:"];

/// Maximum job-name length.
const MAX_NAME_LEN: usize = 100;

/// Minimum length for a non-UUID replica identifier.
const MIN_REPLICA_ID_LEN: usize = 8;

/// True when `name` is reserved for the engine.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Validate a job name against the format rules: `[A-Za-z0-9_-]{1,100}`.
///
/// Reserved-name protection is a separate check (`is_reserved_name`) so the
/// engine itself can create the watch job.
pub fn validate_job_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("job name must not be empty".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("job name exceeds {MAX_NAME_LEN} characters"));
    }
    if !name.chars().all(is_name_char) {
        return Err(format!(
            "job name '{name}' contains invalid characters (allowed: A-Za-z0-9_-)"
        ));
    }
    Ok(())
}

/// Validate a replica identifier: a UUID, or at least eight `[A-Za-z0-9_-]`
/// characters.
pub fn validate_replica_id(id: &str) -> Result<(), String> {
    if looks_like_uuid(id) {
        return Ok(());
    }
    if id.len() >= MIN_REPLICA_ID_LEN && id.chars().all(is_name_char) {
        return Ok(());
    }
    Err(format!(
        "replica id '{id}' must be a UUID or at least {MIN_REPLICA_ID_LEN} characters of A-Za-z0-9_-"
    ))
}

/// Shape check for the canonical hyphenated UUID form.
fn looks_like_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_prefixes_are_detected() {
        assert!(is_reserved_name("__watch__"));
        assert!(is_reserved_name("__anything"));
        assert!(is_reserved_name("system:sweep"));
        assert!(is_reserved_name("internal:gc"));
        assert!(!is_reserved_name("nightly_report"));
        assert!(!is_reserved_name("_single_underscore"));
    }

    #[test]
    fn name_format_rules() {
        assert!(validate_job_name("nightly-report_2024").is_ok());
        assert!(validate_job_name("").is_err());
        assert!(validate_job_name("has space").is_err());
        assert!(validate_job_name("semi;colon").is_err());
        assert!(validate_job_name(&"x".repeat(100)).is_ok());
        assert!(validate_job_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn replica_id_accepts_uuid_or_long_slug() {
        assert!(validate_replica_id("3f2504e0-4f89-41d3-9a0c-0305e82c3301").is_ok());
        assert!(validate_replica_id("replica-east-1").is_ok());
        assert!(validate_replica_id("short").is_err());
        assert!(validate_replica_id("bad id with spaces").is_err());
    }
}
