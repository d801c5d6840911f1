//! HTTP Basic authentication
//!
//! Every protected route runs [`authenticate`] first: the `Authorization`
//! header is decoded into a username/password pair and checked against the
//! users table. Nothing is cached between requests.
//!
//! # Password digest
//!
//! Passwords are stored as the lowercase hex SHA-256 of the UTF-8 password,
//! with no salt and no work factor. This matches hashes written by earlier
//! deployments and is weak against offline guessing. Moving to a salted,
//! adaptive scheme needs a migration that rehashes on next successful login.

use crate::db::{Database, DbError, UserIdentity};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Realm sent in the `WWW-Authenticate` challenge
pub const REALM: &str = "flowjournal";

/// Value of the `WWW-Authenticate` header on a 401
pub fn challenge() -> String {
    format!("Basic realm=\"{}\"", REALM)
}

/// Hex SHA-256 digest of a cleartext password
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Compare two digests without short-circuiting on the first differing byte
pub fn hashes_match(stored: &str, supplied: &str) -> bool {
    let (a, b) = (stored.as_bytes(), supplied.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Username/password pair taken from a Basic header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Why a request was not authenticated
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    Missing,

    #[error("Malformed Authorization header")]
    Malformed,

    #[error("Invalid credentials")]
    Invalid,

    #[error(transparent)]
    Store(#[from] DbError),
}

impl Credentials {
    /// Parse `Basic <base64(username:password)>`
    ///
    /// The scheme is matched case-insensitively and the pair is split on the
    /// first colon, so passwords may contain `:`.
    pub fn from_header(value: &str) -> Result<Self, AuthError> {
        let value = value.trim();
        let (scheme, encoded) = value.split_once(' ').ok_or(AuthError::Malformed)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::Malformed);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::Malformed)?;
        let pair = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        let (username, password) = pair.split_once(':').ok_or(AuthError::Malformed)?;

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Encode as an `Authorization` header value
    pub fn to_header(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

/// Resolve the caller of a request from its `Authorization` header
///
/// Store failures are passed through as [`AuthError::Store`] so the caller can
/// answer 5xx rather than 401.
pub fn authenticate(db: &Database, header: Option<&str>) -> Result<UserIdentity, AuthError> {
    let header = header.ok_or(AuthError::Missing)?;
    let credentials = Credentials::from_header(header)?;

    match db.verify(&credentials.username, &credentials.password)? {
        Some(identity) => {
            debug!(user_id = identity.id, "authenticated");
            Ok(identity)
        }
        None => {
            warn!(username = %credentials.username, "rejected credentials");
            Err(AuthError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;
    use proptest::prelude::*;

    #[test]
    fn test_hash_password_is_sha256_hex() {
        assert_eq!(
            hash_password(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_password("abc").len(), 64);
    }

    #[test]
    fn test_parse_basic_header() {
        // "ana:open sesame"
        let creds = Credentials::from_header("Basic YW5hOm9wZW4gc2VzYW1l").unwrap();
        assert_eq!(creds.username, "ana");
        assert_eq!(creds.password, "open sesame");
    }

    #[test]
    fn test_parse_scheme_case_insensitive() {
        let header = Credentials {
            username: "ana".into(),
            password: "pw".into(),
        }
        .to_header()
        .replace("Basic", "bAsIc");
        assert_eq!(Credentials::from_header(&header).unwrap().username, "ana");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(Credentials::from_header("Bearer abc"), Err(AuthError::Malformed)));
        assert!(matches!(Credentials::from_header("Basic"), Err(AuthError::Malformed)));
        assert!(matches!(Credentials::from_header("Basic !!!"), Err(AuthError::Malformed)));
        // "no-colon"
        assert!(matches!(Credentials::from_header("Basic bm8tY29sb24="), Err(AuthError::Malformed)));
    }

    #[test]
    fn test_authenticate() {
        let (_dir, db) = test_db();
        let id = db.register("ana", "secret").unwrap();

        let good = Credentials { username: "ana".into(), password: "secret".into() }.to_header();
        let bad = Credentials { username: "ana".into(), password: "nope".into() }.to_header();

        assert_eq!(authenticate(&db, Some(&good)).unwrap().id, id);
        assert!(matches!(authenticate(&db, Some(&bad)), Err(AuthError::Invalid)));
        assert!(matches!(authenticate(&db, None), Err(AuthError::Missing)));
    }

    #[test]
    fn test_challenge_header() {
        assert_eq!(challenge(), "Basic realm=\"flowjournal\"");
    }

    proptest! {
        #[test]
        fn prop_header_round_trips(username in "[^:]{0,32}", password in ".{0,64}") {
            let creds = Credentials { username, password };
            let parsed = Credentials::from_header(&creds.to_header()).unwrap();
            prop_assert_eq!(parsed, creds);
        }

        #[test]
        fn prop_hash_matches_only_same_password(a in ".{0,32}", b in ".{0,32}") {
            prop_assert!(hashes_match(&hash_password(&a), &hash_password(&a)));
            prop_assert_eq!(hashes_match(&hash_password(&a), &hash_password(&b)), a == b);
        }
    }
}
