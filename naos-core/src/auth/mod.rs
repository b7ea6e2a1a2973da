//! Session and role domain types, password hashing, and CSRF token
//! comparison. See `spec.md` §4.8 and §4.2's Session row shape. The HTTP-facing
//! pieces (header extraction, middleware ordering) live in `naosd`; this
//! module is the part that is pure domain logic and testable without axum.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::AuthError;

pub const SESSION_TOKEN_BYTES: usize = 32; // 256 bits, well above the spec's 128-bit floor.
pub const SESSION_LIFETIME: Duration = Duration::hours(12);
pub const MIN_PASSWORD_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    // Ordered low-to-high: derive(PartialOrd, Ord) uses declaration order.
    Reader,
    User,
    Admin,
}

impl Role {
    /// A role satisfies a requirement if it is the same or higher in the
    /// `reader < user < admin` ordering `spec.md` §4.2 implies.
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub subject_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub must_change_password: bool,
}

impl Session {
    pub fn new(subject_id: Uuid, role: Role, must_change_password: bool) -> Self {
        let now = Utc::now();
        Self {
            token: generate_session_token(),
            subject_id,
            role,
            created_at: now,
            expires_at: now + SESSION_LIFETIME,
            must_change_password,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Every route except `change-password` and `logout` is blocked while
    /// this is set; callers pass the route's name so this stays a pure
    /// function instead of hardcoding route strings here.
    pub fn blocks_route(&self, route: &str) -> bool {
        self.must_change_password && route != "change-password" && route != "logout"
    }
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let token = hex_encode(&bytes);
    bytes.zeroize();
    token
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Checks `spec.md` §6's password policy: minimum length 10, and all four
/// character classes present (upper, lower, digit, symbol).
pub fn validate_password_policy(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());
    if !(has_upper && has_lower && has_digit && has_symbol) {
        return Err(AuthError::WeakPassword(
            "must include an uppercase letter, a lowercase letter, a digit, and a symbol".to_string(),
        ));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::BadCredentials)
}

pub fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|_| AuthError::BadCredentials)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::BadCredentials)
}

/// CSRF double-submit token comparison. Both sides are server-issued random
/// tokens of equal length, not a secret being probed byte-by-byte over an
/// attacker-controlled channel, so a constant-time compare is a defense in
/// depth measure rather than a strict requirement; the session token
/// comparison (attacker-reachable on every request) is the one that must
/// stay constant-time and does so via [`constant_time_eq`].
pub fn csrf_tokens_match(expected: &str, provided: &str) -> bool {
    constant_time_eq::constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_is_reader_lt_user_lt_admin() {
        assert!(Role::Admin.satisfies(Role::Reader));
        assert!(Role::User.satisfies(Role::User));
        assert!(!Role::Reader.satisfies(Role::Admin));
    }

    #[test]
    fn must_change_password_blocks_everything_but_two_routes() {
        let session = Session {
            must_change_password: true,
            ..Session::new(Uuid::nil(), Role::Admin, true)
        };
        assert!(session.blocks_route("zfs/pools"));
        assert!(!session.blocks_route("change-password"));
        assert!(!session.blocks_route("logout"));
    }

    #[test]
    fn expiry_is_exclusive_at_the_boundary() {
        let session = Session::new(Uuid::nil(), Role::Reader, false);
        assert!(session.is_expired(session.expires_at));
        assert!(!session.is_expired(session.expires_at - Duration::seconds(1)));
    }

    #[test]
    fn password_policy_rejects_missing_classes() {
        assert!(validate_password_policy("short").is_err());
        assert!(validate_password_policy("alllowercase1!").is_err());
        assert!(validate_password_policy("New-Passw0rd!1").is_ok());
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("New-Passw0rd!1").unwrap();
        assert!(verify_password("New-Passw0rd!1", &hash).is_ok());
        assert!(verify_password("wrong-password", &hash).is_err());
    }

    #[test]
    fn csrf_comparison_rejects_mismatch() {
        let token = generate_csrf_token();
        assert!(csrf_tokens_match(&token, &token));
        assert!(!csrf_tokens_match(&token, &generate_csrf_token()));
    }
}
