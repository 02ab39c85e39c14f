// Common Crate - utils.rs
// common/src/utils.rs
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Length of a purpose alias handed to the client in place of the real purpose name
pub const PURPOSE_ALIAS_LEN: usize = 10;

/// Setup tracing for consistent logging across services.
///
/// Honours `RUST_LOG` when set, otherwise logs at `info`.
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Generate a cryptographically secure random alphanumeric token of specified length
pub fn generate_secure_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a random alphanumeric token whose length is drawn from `min..=max`
pub fn generate_token_between(min: usize, max: usize) -> String {
    let length = if max > min {
        thread_rng().gen_range(min..=max)
    } else {
        min
    };
    generate_secure_token(length)
}

/// Viewer identifiers: 30 to 50 alphanumerics
pub fn generate_viewer_id() -> String {
    generate_token_between(30, 50)
}

/// Connection handshake tokens: at least 100 alphanumerics
pub fn generate_handshake_token() -> String {
    generate_token_between(100, 128)
}

/// Opaque alias standing in for a purpose name
pub fn generate_purpose_alias() -> String {
    generate_secure_token(PURPOSE_ALIAS_LEN)
}

/// Per-challenge token appended to a purpose alias (`alias.token`)
pub fn generate_challenge_token() -> String {
    generate_token_between(5, 10)
}

/// CSRF secret paired with a challenge token
pub fn generate_csrf_secret() -> String {
    generate_token_between(10, 20)
}

/// Suffix used when naming freshly created child elements
pub fn generate_element_suffix() -> String {
    generate_token_between(5, 30)
}

/// Truncate a secret for log output
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secure_token() {
        let token = generate_secure_token(32);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_token_lengths_stay_in_range() {
        for _ in 0..50 {
            let id = generate_viewer_id();
            assert!((30..=50).contains(&id.len()));

            let handshake = generate_handshake_token();
            assert!(handshake.len() >= 100);

            let csrf = generate_csrf_secret();
            assert!((10..=20).contains(&csrf.len()));

            let token = generate_challenge_token();
            assert!((5..=10).contains(&token.len()));
        }
        assert_eq!(generate_purpose_alias().len(), PURPOSE_ALIAS_LEN);
    }

    #[test]
    fn test_degenerate_range_uses_min() {
        assert_eq!(generate_token_between(7, 3).len(), 7);
    }

    #[test]
    fn test_handshake_tokens_are_unique() {
        assert_ne!(generate_handshake_token(), generate_handshake_token());
    }

    #[test]
    fn test_redact_keeps_short_prefix() {
        assert_eq!(redact("abcdefghij"), "abcdef…");
        assert_eq!(redact("ab"), "ab…");
    }
}
