use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use portico_crypto::PorticoCrypto;
use portico_errors::{ControlError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Single-administrator login and bearer-token registry.
///
/// Tokens are remembered by digest in a TTL cache; an expired or unknown
/// token fails validation the same way. At `max_tokens` the least recently
/// used token is evicted, so a fresh login is always admitted.
pub struct CredentialStore {
    username: String,
    password_hash: String,
    salt: String,
    tokens: Cache<String, ()>,
    ttl: Duration,
    max_tokens: u64,
}

impl CredentialStore {
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        salt: impl Into<String>,
        ttl: Duration,
        max_tokens: u64,
    ) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            salt: salt.into(),
            tokens: Cache::builder()
                .max_capacity(max_tokens)
                .eviction_policy(EvictionPolicy::lru())
                .time_to_live(ttl)
                .build(),
            ttl,
            max_tokens,
        }
    }

    /// Hashes a plaintext password once, keeping only the hash.
    pub fn from_plain(
        username: impl Into<String>,
        password: &str,
        ttl: Duration,
        max_tokens: u64,
    ) -> Self {
        let (hash, salt) = PorticoCrypto::hash_password(password, None);
        Self::new(username, hash, salt, ttl, max_tokens)
    }

    pub fn token_ttl(&self) -> Duration {
        self.ttl
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        // Check both so a wrong username costs the same as a wrong password.
        let user_ok = username == self.username;
        let pass_ok = PorticoCrypto::check_password(password, &self.salt, &self.password_hash);
        if !(user_ok && pass_ok) {
            warn!(username = %username, "login rejected");
            return Err(ControlError::auth("invalid credentials"));
        }
        let token = PorticoCrypto::generate_token();
        self.tokens.insert(PorticoCrypto::token_digest(&token), ());
        let live = self.tokens.entry_count();
        if live.saturating_mul(10) >= self.max_tokens.saturating_mul(9) {
            warn!(live, max = self.max_tokens, "token cache nearly full; oldest sessions are being evicted");
        }
        info!(username = %username, "login accepted");
        Ok(token)
    }

    pub fn is_valid(&self, token: &str) -> bool {
        !token.is_empty() && self.tokens.contains_key(&PorticoCrypto::token_digest(token))
    }

    pub fn validate(&self, token: &str) -> Result<()> {
        if self.is_valid(token) {
            Ok(())
        } else {
            debug!("bearer token rejected");
            Err(ControlError::auth("missing, invalid or expired token"))
        }
    }

    /// Forgets a token. Unknown tokens are ignored.
    pub fn revoke(&self, token: &str) {
        self.tokens.invalidate(&PorticoCrypto::token_digest(token));
    }
}
