//! Email address normalization for login requests.

use std::sync::OnceLock;

use regex::Regex;

use super::error::AuthError;

const MAX_EMAIL_LENGTH: usize = 254;
const BLACKLISTED_DOMAINS: &[&str] = &["tempmail.com", "disposable.com"];

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("email pattern compiles")
    })
}

/// Trim and lowercase `raw`, then check shape and domain.
///
/// The normalized form is what keys the `login:{email}` record, so two
/// spellings of one address share a single pending login.
pub fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(AuthError::InvalidEmail(format!(
            "must be at most {} characters",
            MAX_EMAIL_LENGTH
        )));
    }
    if !email_regex().is_match(&email) {
        return Err(AuthError::InvalidEmail("invalid email format".to_string()));
    }

    let domain = email.rsplit('@').next().unwrap_or_default();
    if BLACKLISTED_DOMAINS.contains(&domain) {
        return Err(AuthError::InvalidEmail("email domain not allowed".to_string()));
    }

    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(
            normalize_email("  Alice@Example.COM ").unwrap(),
            "alice@example.com"
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in ["", "alice", "alice@", "@example.com", "alice@example", "a b@example.com"] {
            assert!(
                matches!(normalize_email(raw), Err(AuthError::InvalidEmail(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_blacklisted_domains() {
        assert!(matches!(
            normalize_email("bob@TempMail.com"),
            Err(AuthError::InvalidEmail(_))
        ));
    }

    #[test]
    fn rejects_overlong_addresses() {
        let local = "a".repeat(250);
        assert!(normalize_email(&format!("{}@example.com", local)).is_err());
    }
}
