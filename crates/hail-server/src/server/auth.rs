//! Static principal store backing the handshake.

use std::collections::HashMap;

use hail_wire::{Authenticate, Credentials, Error};

/// One registered identity. Roles are carried for completeness but drive no
/// policy beyond "authenticated or not".
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub secret: String,
    pub roles: Vec<String>,
}

impl Principal {
    /// Parses a `username:secret[:role[:role...]]` spec.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let mut parts = spec.split(':');
        let username = parts.next().unwrap_or_default();
        let secret = parts.next().unwrap_or_default();
        if username.is_empty() || secret.is_empty() {
            anyhow::bail!("user spec `{spec}` must look like `username:secret[:role]`");
        }
        Ok(Self {
            username: username.to_owned(),
            secret: secret.to_owned(),
            roles: parts.map(str::to_owned).collect(),
        })
    }
}

/// Accepts or rejects handshakes against the in-memory principal store.
/// Built once at startup; safe for concurrent reads without
/// synchronization.
pub struct Authenticator {
    principals: HashMap<String, Principal>,
}

impl Authenticator {
    pub fn new(principals: impl IntoIterator<Item = Principal>) -> Self {
        Self {
            principals: principals
                .into_iter()
                .map(|p| (p.username.clone(), p))
                .collect(),
        }
    }
}

impl Authenticate for Authenticator {
    fn authenticate(&self, credentials: &Credentials) -> hail_wire::Result<String> {
        match self.principals.get(&credentials.username) {
            Some(known) if known.secret == credentials.secret => Ok(known.username.clone()),
            // One message for both misses; which part failed is nobody's
            // business but ours.
            _ => Err(Error::Auth {
                reason: "bad credentials".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new([Principal::parse("jlong:pw:USER").unwrap()])
    }

    #[test]
    fn matching_secret_is_accepted() {
        let principal = authenticator()
            .authenticate(&Credentials::new("jlong", "pw"))
            .unwrap();
        assert_eq!(principal, "jlong");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let result = authenticator().authenticate(&Credentials::new("jlong", "guess"));
        assert!(matches!(result, Err(Error::Auth { .. })));
    }

    #[test]
    fn unknown_username_is_rejected() {
        let result = authenticator().authenticate(&Credentials::new("mallory", "pw"));
        assert!(matches!(result, Err(Error::Auth { .. })));
    }

    #[test]
    fn principal_spec_requires_username_and_secret() {
        assert!(Principal::parse("jlong").is_err());
        assert!(Principal::parse(":pw").is_err());
        let full = Principal::parse("alice:s3cret:USER:ADMIN").unwrap();
        assert_eq!(full.roles, vec!["USER".to_owned(), "ADMIN".to_owned()]);
    }
}
