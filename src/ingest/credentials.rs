use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const HASH_SCHEME: &str = "sha256";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordPolicy {
    Random,
    /// Lower-cased first name followed by the identity key. Guessable; kept
    /// only for campuses still onboarding with that convention.
    Derived,
}

#[derive(Clone, Debug)]
pub struct IssuedPassword {
    pub hash: String,
    pub must_reset: bool,
}

pub fn issue_password(
    policy: PasswordPolicy,
    random_len: usize,
    first_name: Option<&str>,
    identity_key: &str,
) -> IssuedPassword {
    match policy {
        PasswordPolicy::Random => IssuedPassword {
            hash: hash_password(&random_password(random_len)),
            must_reset: true,
        },
        PasswordPolicy::Derived => IssuedPassword {
            hash: hash_password(&derived_password(first_name, identity_key)),
            must_reset: false,
        },
    }
}

pub fn derived_password(first_name: Option<&str>, identity_key: &str) -> String {
    let first = first_name
        .unwrap_or("")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    format!("{}{}", first, identity_key)
}

fn random_password(len: usize) -> String {
    let len = len.clamp(8, 64);
    let mut s = String::new();
    while s.len() < len {
        s.push_str(&Uuid::new_v4().simple().to_string());
    }
    s.truncate(len);
    s
}

fn digest(salt: &str, plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(plain.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `sha256$<salt>$<hex digest>` with a fresh per-call salt.
pub fn hash_password(plain: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}${}", HASH_SCHEME, salt, digest(&salt, plain))
}

#[cfg(test)]
fn verify_password(plain: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(HASH_SCHEME), Some(salt), Some(hex)) => digest(salt, plain) == hex,
        _ => false,
    }
}
