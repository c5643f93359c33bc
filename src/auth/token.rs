//! Opaque bearer tokens and Argon2id secret hashing.
//!
//! A token reads `vca_<lookup>_<secret>` (access) or `vcr_<lookup>_<secret>`
//! (refresh). Only the lookup is stored in clear; the whole string is hashed.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::RngCore;

use crate::error::{Error, Result};
use crate::types::TokenKind;

const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_LANES: u32 = 4;

const LOOKUP_LEN: usize = 10;
const SECRET_BYTES: usize = 20;

const fn prefix(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Access => "vca",
        TokenKind::Refresh => "vcr",
    }
}

/// A freshly minted token. `raw` goes to the client, the rest to the store.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub lookup: String,
    pub hash: String,
}

/// The clear parts of a presented token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub kind: TokenKind,
    pub lookup: String,
}

/// Hashes passwords and tokens, and mints new tokens.
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretHasher {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, ARGON2_LANES, None)
            .unwrap_or_default();
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    pub fn issue(&self, kind: TokenKind) -> Result<IssuedToken> {
        let lookup = random_hex(LOOKUP_LEN / 2);
        let raw = format!("{}_{lookup}_{}", prefix(kind), random_hex(SECRET_BYTES));
        let hash = self.hash(&raw)?;
        Ok(IssuedToken { raw, lookup, hash })
    }

    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Internal(format!("hashing secret: {e}")))
    }

    /// `Ok(false)` on mismatch; errors only for unreadable stored hashes.
    pub fn verify(&self, secret: &str, stored: &str) -> Result<bool> {
        let parsed = PasswordHash::new(stored)
            .map_err(|e| Error::Internal(format!("stored hash is unreadable: {e}")))?;
        match self.argon2.verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Internal(format!("verifying secret: {e}"))),
        }
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Splits a presented token. Anything malformed is `Unauthorized`.
pub fn parse_token(raw: &str) -> Result<ParsedToken> {
    let mut parts = raw.splitn(3, '_');
    let (Some(tag), Some(lookup), Some(secret)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::Unauthorized);
    };

    let kind = [TokenKind::Access, TokenKind::Refresh]
        .into_iter()
        .find(|kind| prefix(*kind) == tag)
        .ok_or(Error::Unauthorized)?;

    let is_hex = |s: &str| s.bytes().all(|b| b.is_ascii_hexdigit());
    if lookup.len() != LOOKUP_LEN
        || secret.len() != SECRET_BYTES * 2
        || !is_hex(lookup)
        || !is_hex(secret)
    {
        return Err(Error::Unauthorized);
    }

    Ok(ParsedToken {
        kind,
        lookup: lookup.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_parse() {
        let hasher = SecretHasher::new();
        let issued = hasher.issue(TokenKind::Refresh).unwrap();

        assert!(issued.raw.starts_with("vcr_"));
        let parsed = parse_token(&issued.raw).unwrap();
        assert_eq!(parsed.kind, TokenKind::Refresh);
        assert_eq!(parsed.lookup, issued.lookup);
        assert!(hasher.verify(&issued.raw, &issued.hash).unwrap());
    }

    #[test]
    fn test_tampered_token_does_not_verify() {
        let hasher = SecretHasher::new();
        let issued = hasher.issue(TokenKind::Access).unwrap();
        let mut tampered = issued.raw.clone();
        let last = if tampered.ends_with('0') { "1" } else { "0" };
        tampered.replace_range(tampered.len() - 1.., last);

        assert!(parse_token(&tampered).is_ok());
        assert!(!hasher.verify(&tampered, &issued.hash).unwrap());
    }

    #[test]
    fn test_password_hash() {
        let hasher = SecretHasher::new();
        let hash = hasher.hash("s3cret-pass").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("s3cret-pass", &hash).unwrap());
        assert!(!hasher.verify("other", &hash).unwrap());
        assert!(hasher.verify("s3cret-pass", "not a hash").is_err());
    }

    #[test]
    fn test_malformed_tokens() {
        let secret = "ab".repeat(SECRET_BYTES);
        assert!(parse_token(&format!("vca_0123456789_{secret}")).is_ok());

        assert!(parse_token(&format!("xyz_0123456789_{secret}")).is_err());
        assert!(parse_token(&format!("vca_012345_{secret}")).is_err());
        assert!(parse_token(&format!("vca_012345678z_{secret}")).is_err());
        assert!(parse_token("vca_0123456789").is_err());
        assert!(parse_token("").is_err());
    }
}
