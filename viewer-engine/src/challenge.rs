// viewer-engine/src/challenge.rs
use common::{generate_challenge_token, generate_csrf_secret, generate_purpose_alias, redact};
use std::collections::HashMap;

/// Hidden-field pair handed to the client with a form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// `alias.token`
    pub purpose: String,
    pub secret: String,
}

impl Challenge {
    pub fn to_hidden_inputs(&self) -> String {
        format!(
            r#"<input type="hidden" name="PURPOSE" value="{}"><input type="hidden" name="CSRF" value="{}">"#,
            self.purpose, self.secret
        )
    }
}

/// Per-viewer purpose aliases and outstanding single-use challenges
#[derive(Default)]
pub(crate) struct PurposeBook {
    purpose_to_alias: HashMap<String, String>,
    alias_to_purpose: HashMap<String, String>,
    // alias -> (alias.token -> secret)
    outstanding: HashMap<String, HashMap<String, String>>,
}

impl PurposeBook {
    /// Alias for a purpose, minted on first use and stable afterwards
    fn alias_for(&mut self, purpose: &str) -> String {
        if let Some(alias) = self.purpose_to_alias.get(purpose) {
            return alias.clone();
        }
        let alias = loop {
            let candidate = generate_purpose_alias();
            if !self.alias_to_purpose.contains_key(&candidate) {
                break candidate;
            }
        };
        self.purpose_to_alias.insert(purpose.to_string(), alias.clone());
        self.alias_to_purpose.insert(alias.clone(), purpose.to_string());
        alias
    }

    pub fn issue(&mut self, purpose: &str) -> Challenge {
        let alias = self.alias_for(purpose);
        let bucket = self.outstanding.entry(alias.clone()).or_default();
        loop {
            let value = format!("{}.{}", alias, generate_challenge_token());
            if bucket.contains_key(&value) {
                continue;
            }
            let secret = generate_csrf_secret();
            bucket.insert(value.clone(), secret.clone());
            return Challenge { purpose: value, secret };
        }
    }

    /// Consume the challenge named by `purpose_value` and check its secret.
    ///
    /// The stored secret is removed before comparing, so a value can be
    /// redeemed at most once whatever the outcome. Returns the real purpose.
    pub fn redeem(&mut self, purpose_value: &str, secret: &str) -> Option<String> {
        let (alias, _) = purpose_value.split_once('.')?;
        let expected = self.outstanding.get_mut(alias)?.remove(purpose_value)?;

        if secret.is_empty() || expected != secret {
            tracing::debug!("Challenge secret mismatch for {}", redact(purpose_value));
            return None;
        }
        self.alias_to_purpose.get(alias).cloned()
    }

    #[cfg(test)]
    pub fn alias_of(&self, purpose: &str) -> Option<&str> {
        self.purpose_to_alias.get(purpose).map(String::as_str)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_is_stable_per_purpose() {
        let mut book = PurposeBook::default();
        let a = book.issue("login");
        let b = book.issue("login");
        let c = book.issue("register");

        let alias = book.alias_of("login").unwrap().to_string();
        assert_eq!(alias.len(), 10);
        assert!(a.purpose.starts_with(&format!("{}.", alias)));
        assert!(b.purpose.starts_with(&format!("{}.", alias)));
        assert_ne!(a.purpose, b.purpose);
        assert!(!c.purpose.starts_with(&format!("{}.", alias)));
        assert!(!a.purpose.contains("login"));
        assert_eq!(book.outstanding(), 3);
    }

    #[test]
    fn test_redeem_once() {
        let mut book = PurposeBook::default();
        let challenge = book.issue("login");
        assert_eq!(book.redeem(&challenge.purpose, &challenge.secret).as_deref(), Some("login"));
        assert_eq!(book.redeem(&challenge.purpose, &challenge.secret), None);
        assert_eq!(book.outstanding(), 0);
    }

    #[test]
    fn test_failed_redeem_still_consumes() {
        let mut book = PurposeBook::default();
        let challenge = book.issue("login");
        assert_eq!(book.redeem(&challenge.purpose, "wrong-secret"), None);
        assert_eq!(book.redeem(&challenge.purpose, &challenge.secret), None);
    }

    #[test]
    fn test_unknown_or_malformed_values() {
        let mut book = PurposeBook::default();
        let challenge = book.issue("login");
        assert_eq!(book.redeem("no-dot", &challenge.secret), None);
        assert_eq!(book.redeem("unknown.alias", &challenge.secret), None);
        assert_eq!(book.redeem(&challenge.purpose, ""), None);
    }

    #[test]
    fn test_hidden_inputs_markup() {
        let challenge = Challenge {
            purpose: "abc.def".to_string(),
            secret: "s3cret".to_string(),
        };
        assert_eq!(
            challenge.to_hidden_inputs(),
            r#"<input type="hidden" name="PURPOSE" value="abc.def"><input type="hidden" name="CSRF" value="s3cret">"#
        );
    }
}
