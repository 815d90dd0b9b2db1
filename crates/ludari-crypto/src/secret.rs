//! Query-secret strength rules, enforced at Manager construction.

use crate::{CryptoError, Result};

const MIN_LEN: usize = 32;
/// A run of this many identical or monotonically stepping characters
/// disqualifies the secret.
const RUN_LEN: usize = 4;

/// Substrings that disqualify a secret regardless of its other properties.
/// Matched case-insensitively.
const COMMON_WORDS: &[&str] = &[
    "password", "passwort", "qwerty", "letmein", "welcome", "admin", "secret", "monkey",
    "dragon", "iloveyou",
];

/// Validate a query secret: length ≥ 32, at least three of the four
/// character classes, and none of the obvious weak patterns.
pub fn validate_query_secret(secret: &str) -> Result<()> {
    if secret.len() < MIN_LEN {
        return Err(CryptoError::WeakSecret(format!(
            "must be at least {MIN_LEN} characters"
        )));
    }

    let classes = [
        secret.chars().any(|c| c.is_ascii_lowercase()),
        secret.chars().any(|c| c.is_ascii_uppercase()),
        secret.chars().any(|c| c.is_ascii_digit()),
        secret.chars().any(|c| !c.is_ascii_alphanumeric()),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    if classes < 3 {
        return Err(CryptoError::WeakSecret(
            "must contain at least three of: lowercase, uppercase, digits, symbols".into(),
        ));
    }

    if has_repeated_run(secret) {
        return Err(CryptoError::WeakSecret(
            "contains a run of repeated characters".into(),
        ));
    }
    if has_monotonic_run(secret) {
        return Err(CryptoError::WeakSecret(
            "contains a sequential character run".into(),
        ));
    }

    let lower = secret.to_lowercase();
    if let Some(word) = COMMON_WORDS.iter().find(|w| lower.contains(**w)) {
        return Err(CryptoError::WeakSecret(format!(
            "contains the common word '{word}'"
        )));
    }

    Ok(())
}

/// True when any character repeats `RUN_LEN` times in a row.
fn has_repeated_run(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    chars
        .windows(RUN_LEN)
        .any(|w| w.iter().all(|c| *c == w[0]))
}

/// True when `RUN_LEN` letters or digits step by +1 or -1 in a row
/// (`abcd`, `4321`). Case-insensitive for letters.
fn has_monotonic_run(s: &str) -> bool {
    let codes: Vec<Option<i32>> = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c.to_ascii_lowercase() as i32)
            } else {
                None
            }
        })
        .collect();

    codes.windows(RUN_LEN).any(|w| {
        let steps: Vec<i32> = w
            .windows(2)
            .filter_map(|pair| match (pair[0], pair[1]) {
                (Some(a), Some(b)) => Some(b - a),
                _ => None,
            })
            .collect();
        steps.len() == RUN_LEN - 1 && (steps.iter().all(|d| *d == 1) || steps.iter().all(|d| *d == -1))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_strong_secret() {
        assert!(validate_query_secret("Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!").is_ok());
        assert!(validate_query_secret("k9$Qw7#mZp2@Lx5&Vb8*Nr4!Tj6%Hc3^").is_ok());
    }

    #[test]
    fn rejects_short_secrets() {
        let err = validate_query_secret("Aa1!Aa1!").unwrap_err();
        assert!(matches!(err, CryptoError::WeakSecret(_)));
    }

    #[test]
    fn rejects_too_few_character_classes() {
        // 32 chars but only lowercase and digits
        let err = validate_query_secret("a1b2c8d9e1f2g8h9a1b2c8d9e1f2g8h9").unwrap_err();
        assert!(err.to_string().contains("three of"));
    }

    #[test]
    fn rejects_repeated_character_runs() {
        let err = validate_query_secret("Xaaaa1!Qw9#Qw8#Qw7!Qw5#Qw2!Qw0#zz").unwrap_err();
        assert!(err.to_string().contains("repeated"));
    }

    #[test]
    fn rejects_monotonic_sequences() {
        let up = validate_query_secret("abcdA1!xA1!xA1!xA1!xA1!xA1!xA1!x").unwrap_err();
        assert!(up.to_string().contains("sequential"));
        let down = validate_query_secret("4321A!zxA!zxA!zxA!zxA!zxA!zxA!zx").unwrap_err();
        assert!(down.to_string().contains("sequential"));
    }

    #[test]
    fn rejects_common_words() {
        let err = validate_query_secret("Password1!xQ9#Password1!xQ9#zzWw").unwrap_err();
        assert!(err.to_string().contains("password"));
    }
}
