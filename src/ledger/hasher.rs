//! Canonical block encoding and the SHA-256 digest over it.
//!
//! The encoding is line based, one field per line in a fixed order, with
//! free-form strings length-prefixed:
//!
//! ```text
//! study-chain/v1
//! sequence_number:0
//! owner_id:2:u1
//! payload.schema_version:1
//! payload.date:2024-03-01
//! payload.subject:4:Math
//! payload.duration_minutes:60
//! payload.status:completed
//! payload.supersedes:-
//! created_at:19:2024-03-01 12:00:00
//! previous_hash:0000…0000
//! difficulty:2
//! nonce:117
//! ```
//!
//! The nonce is always the last line, so a miner can feed the fixed prefix to
//! the digest once and only hash the nonce per attempt.

use sha2::{Digest, Sha256};

use super::block::{OwnerId, SessionRecord};

/// Length of a hex encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

const ENCODING_TAG: &str = "study-chain/v1";

/// The hashed fields of a block, minus the nonce
#[derive(Debug, Clone, Copy)]
pub struct Content<'a> {
    pub sequence_number: u64,
    pub owner_id: &'a OwnerId,
    pub payload: &'a SessionRecord,
    pub created_at: &'a str,
    pub previous_hash: &'a str,
    pub difficulty: u32,
}

impl<'a> Content<'a> {
    /// Same content with a different `previous_hash`
    pub fn with_previous_hash(self, previous_hash: &'a str) -> Self {
        Content {
            previous_hash,
            ..self
        }
    }
}

/// Encodes everything but the nonce line
fn encode_prefix(content: &Content<'_>) -> String {
    let payload = content.payload;
    let supersedes = match payload.supersedes {
        Some(sequence_number) => sequence_number.to_string(),
        None => "-".to_string(),
    };

    format!(
        "{}\n\
         sequence_number:{}\n\
         owner_id:{}:{}\n\
         payload.schema_version:{}\n\
         payload.date:{}\n\
         payload.subject:{}:{}\n\
         payload.duration_minutes:{}\n\
         payload.status:{}\n\
         payload.supersedes:{}\n\
         created_at:{}:{}\n\
         previous_hash:{}\n\
         difficulty:{}\n",
        ENCODING_TAG,
        content.sequence_number,
        content.owner_id.0.len(),
        content.owner_id.0,
        payload.schema_version,
        payload.date.format("%Y-%m-%d"),
        payload.subject.len(),
        payload.subject,
        payload.duration_minutes,
        payload.status.as_str(),
        supersedes,
        content.created_at.len(),
        content.created_at,
        content.previous_hash,
        content.difficulty,
    )
}

fn nonce_line(nonce: u64) -> String {
    format!("nonce:{}\n", nonce)
}

/// Returns the exact text that is hashed for `content` and `nonce`
pub fn canonical_encoding(content: &Content<'_>, nonce: u64) -> String {
    let mut encoded = encode_prefix(content);
    encoded.push_str(&nonce_line(nonce));
    encoded
}

/// Calculates the hash of a block's content with the given nonce
///
/// # Returns
///
/// The SHA-256 digest as a 64 character lowercase hexadecimal string
pub fn calculate_hash(content: &Content<'_>, nonce: u64) -> String {
    PreparedContent::new(content).digest(nonce)
}

/// A digest primed with the fixed part of a block's encoding
///
/// Cloning the primed state per nonce avoids re-hashing the prefix on every
/// mining attempt.
#[derive(Clone)]
pub struct PreparedContent {
    primed: Sha256,
}

impl PreparedContent {
    pub fn new(content: &Content<'_>) -> Self {
        PreparedContent {
            primed: Sha256::new_with_prefix(encode_prefix(content).as_bytes()),
        }
    }

    /// Hex digest of the prepared content with `nonce` appended
    pub fn digest(&self, nonce: u64) -> String {
        let mut hasher = self.primed.clone();
        hasher.update(nonce_line(nonce).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Counts the leading `'0'` characters of a hex digest
pub fn leading_zeros(hash: &str) -> usize {
    hash.bytes().take_while(|b| *b == b'0').count()
}

/// Whether `hash` has at least `difficulty` leading zero hex characters
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    leading_zeros(hash) >= difficulty as usize
}
