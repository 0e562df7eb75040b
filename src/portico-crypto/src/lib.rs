use base64::{ engine::general_purpose::URL_SAFE_NO_PAD, Engine as _ };
use hmac::{ Hmac, Mac };
use rand::Rng;
use sha2::{ Digest, Sha256 };

type HmacSha256 = Hmac<Sha256>;

/// Stretching rounds applied to administrator passwords.
pub const PASSWORD_ROUNDS: u32 = 10_000;

/// Random bytes in a bearer token before encoding.
pub const TOKEN_BYTES: usize = 32;

pub struct PorticoCrypto;

impl PorticoCrypto {
    pub fn generate_salt(len: usize) -> String {
        let mut rng = rand::rng();
        (0..len).map(|_| format!("{:x}", rng.random_range(0..16))).collect()
    }

    fn keyed(salt: &str) -> HmacSha256 {
        HmacSha256::new_from_slice(salt.as_bytes()).expect("hmac accepts keys of any length")
    }

    /// Runs every stretching round except the last and returns the mac that
    /// will absorb the final round, so hashing and verification share it.
    fn stretch(password: &str, salt: &str) -> HmacSha256 {
        let mut mac = Self::keyed(salt);
        mac.update(password.as_bytes());
        for _ in 1..PASSWORD_ROUNDS {
            let prev = mac.finalize().into_bytes();
            mac = Self::keyed(salt);
            mac.update(&prev);
        }
        mac
    }

    /// Hashes `password` with `salt`, generating a fresh salt when none is given.
    /// Returns `(hash, salt)`.
    pub fn hash_password(password: &str, salt: Option<&str>) -> (String, String) {
        let salt_val = salt.map(str::to_string).unwrap_or_else(|| Self::generate_salt(16));
        let digest = Self::stretch(password, &salt_val).finalize().into_bytes();
        (URL_SAFE_NO_PAD.encode(digest), salt_val)
    }

    /// Constant-time check of `password` against a stored hash.
    pub fn check_password(password: &str, salt: &str, hashed: &str) -> bool {
        let Ok(expected) = URL_SAFE_NO_PAD.decode(hashed) else {
            return false;
        };
        Self::stretch(password, salt).verify_slice(&expected).is_ok()
    }

    /// Fresh opaque bearer token.
    pub fn generate_token() -> String {
        let bytes: [u8; TOKEN_BYTES] = rand::random();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Digest under which a token is remembered, so raw tokens never sit in memory tables.
    pub fn token_digest(token: &str) -> String {
        let mut sha256 = Sha256::new();
        sha256.update(token.as_bytes());
        URL_SAFE_NO_PAD.encode(sha256.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip_with_generated_salt() {
        let (hash, salt) = PorticoCrypto::hash_password("s3cret", None);
        assert_eq!(salt.len(), 16);
        assert!(PorticoCrypto::check_password("s3cret", &salt, &hash));
        assert!(!PorticoCrypto::check_password("s3cret!", &salt, &hash));
        assert!(!PorticoCrypto::check_password("s3cret", "other-salt", &hash));
    }

    #[test]
    fn explicit_salt_is_deterministic() {
        let (a, _) = PorticoCrypto::hash_password("pw", Some("abcd"));
        let (b, _) = PorticoCrypto::hash_password("pw", Some("abcd"));
        assert_eq!(a, b);
    }

    #[test]
    fn garbage_hash_never_matches() {
        assert!(!PorticoCrypto::check_password("pw", "abcd", "%%not-base64%%"));
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = PorticoCrypto::generate_token();
        let b = PorticoCrypto::generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(PorticoCrypto::token_digest(&a), a);
        assert_eq!(PorticoCrypto::token_digest(&a), PorticoCrypto::token_digest(&a));
    }
}
