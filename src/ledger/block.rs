use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

use super::hasher::{self, Content};
use super::miner::Seal;

/// Sequence number of the first block in every chain
pub const GENESIS_SEQUENCE: u64 = 0;

/// Previous hash recorded on the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Format of `created_at`, hashed verbatim
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current version of the session record layout
pub const SCHEMA_VERSION: u32 = 1;

/// Errors raised when a session record or owner id is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Subject cannot be empty")]
    EmptySubject,

    #[error("Duration must be positive")]
    ZeroDuration,

    #[error("Duration of {0} hours is too long")]
    DurationTooLong(u32),

    #[error("Unsupported schema version: {0}")]
    UnsupportedSchema(u32),

    #[error("Owner id cannot be empty")]
    EmptyOwner,

    #[error("Unknown session status: {0}")]
    UnknownStatus(String),
}

/// Identifier of the entity owning a chain
///
/// Always trimmed and non-empty; parse one with [`str::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String")]
pub struct OwnerId(pub(crate) String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PayloadError::EmptyOwner);
        }

        Ok(OwnerId(trimmed.to_string()))
    }
}

impl TryFrom<String> for OwnerId {
    type Error = PayloadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        OwnerId(s.to_string())
    }
}

/// Status of a study session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Pending,
    Completed,
}

impl SessionStatus {
    /// Canonical spelling used by the hasher
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(PayloadError::UnknownStatus(other.to_string())),
        }
    }
}

/// The payload carried by a block: one study session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionRecord {
    /// Version of the record layout
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Day the session took place
    #[schema(value_type = String, example = "2024-03-01")]
    pub date: NaiveDate,

    /// What was studied
    pub subject: String,

    /// Length of the session in minutes
    pub duration_minutes: u32,

    /// Whether the session is done
    pub status: SessionStatus,

    /// Sequence number of the earlier block this record amends
    #[serde(default)]
    pub supersedes: Option<u64>,
}

/// Default version for session records
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl SessionRecord {
    /// Creates a new session record at the current schema version
    ///
    /// The subject is trimmed; nothing else is normalised.
    pub fn new(date: NaiveDate, subject: &str, duration_minutes: u32, status: SessionStatus) -> Self {
        SessionRecord {
            schema_version: default_schema_version(),
            date,
            subject: subject.trim().to_string(),
            duration_minutes,
            status,
            supersedes: None,
        }
    }

    /// Checks the record before it is handed to the ledger
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(PayloadError::UnsupportedSchema(self.schema_version));
        }

        if self.subject.trim().is_empty() {
            return Err(PayloadError::EmptySubject);
        }

        if self.duration_minutes == 0 {
            return Err(PayloadError::ZeroDuration);
        }

        Ok(())
    }

    /// Returns a copy marked as completed that amends the block at `sequence_number`
    pub fn completed_from(&self, sequence_number: u64) -> Self {
        SessionRecord {
            status: SessionStatus::Completed,
            supersedes: Some(sequence_number),
            ..self.clone()
        }
    }
}

/// Represents a block in an owner's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Position of the block in its chain
    pub sequence_number: u64,

    /// Owner of the chain
    pub owner_id: OwnerId,

    /// The recorded session
    pub payload: SessionRecord,

    /// Time the block was sealed
    #[schema(example = "2024-03-01 12:00:00")]
    pub created_at: String,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work
    pub nonce: u64,

    /// Leading zero hex characters required when this block was sealed
    pub difficulty: u32,

    /// Hash of this block
    pub hash: String,
}

impl Block {
    /// Borrows the hashed fields of the block, minus the nonce
    pub fn content(&self) -> Content<'_> {
        Content {
            sequence_number: self.sequence_number,
            owner_id: &self.owner_id,
            payload: &self.payload,
            created_at: &self.created_at,
            previous_hash: &self.previous_hash,
            difficulty: self.difficulty,
        }
    }

    /// Recomputes the hash of the block from its stored fields
    pub fn calculate_hash(&self) -> String {
        hasher::calculate_hash(&self.content(), self.nonce)
    }

    /// Whether the stored hash matches the content and meets the stored difficulty
    pub fn has_valid_seal(&self) -> bool {
        let computed = self.calculate_hash();
        computed == self.hash && hasher::meets_difficulty(&computed, self.difficulty)
    }

    /// Whether this block starts a chain
    pub fn is_genesis(&self) -> bool {
        self.sequence_number == GENESIS_SEQUENCE
    }
}

/// A block whose content is fixed but which has not been mined yet
#[derive(Debug, Clone)]
pub struct Draft {
    pub sequence_number: u64,
    pub owner_id: OwnerId,
    pub payload: SessionRecord,
    pub created_at: String,
    pub previous_hash: String,
    pub difficulty: u32,
}

impl Draft {
    /// Creates a draft linked to `tail`, or a genesis draft when the chain is empty
    pub fn after(
        tail: Option<&Block>,
        owner_id: OwnerId,
        payload: SessionRecord,
        created_at: String,
        difficulty: u32,
    ) -> Self {
        let (sequence_number, previous_hash) = match tail {
            Some(block) => (block.sequence_number + 1, block.hash.clone()),
            None => (GENESIS_SEQUENCE, GENESIS_PREVIOUS_HASH.to_string()),
        };

        Draft {
            sequence_number,
            owner_id,
            payload,
            created_at,
            previous_hash,
            difficulty,
        }
    }

    pub fn content(&self) -> Content<'_> {
        Content {
            sequence_number: self.sequence_number,
            owner_id: &self.owner_id,
            payload: &self.payload,
            created_at: &self.created_at,
            previous_hash: &self.previous_hash,
            difficulty: self.difficulty,
        }
    }

    /// Turns the draft into an immutable block using the mined seal
    pub fn seal(self, seal: Seal) -> Block {
        Block {
            sequence_number: self.sequence_number,
            owner_id: self.owner_id,
            payload: self.payload,
            created_at: self.created_at,
            previous_hash: self.previous_hash,
            nonce: seal.nonce,
            difficulty: self.difficulty,
            hash: seal.hash,
        }
    }
}

/// Current UTC time in the format hashed into `created_at`
pub fn timestamp_now() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "  Math ",
            60,
            SessionStatus::Completed,
        )
    }

    #[test]
    fn test_new_record_trims_subject() {
        let record = record();

        assert_eq!(record.subject, "Math");
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.supersedes, None);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        let mut empty = record();
        empty.subject = "   ".to_string();
        assert_eq!(empty.validate(), Err(PayloadError::EmptySubject));

        let mut zero = record();
        zero.duration_minutes = 0;
        assert_eq!(zero.validate(), Err(PayloadError::ZeroDuration));

        let mut future = record();
        future.schema_version = 2;
        assert_eq!(future.validate(), Err(PayloadError::UnsupportedSchema(2)));
    }

    #[test]
    fn test_completed_from_links_original() {
        let mut pending = record();
        pending.status = SessionStatus::Pending;

        let completed = pending.completed_from(4);

        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.supersedes, Some(4));
        assert_eq!(completed.subject, pending.subject);
    }

    #[test]
    fn test_genesis_draft_uses_sentinel() {
        let draft = Draft::after(None, OwnerId::from("u1"), record(), timestamp_now(), 2);

        assert_eq!(draft.sequence_number, GENESIS_SEQUENCE);
        assert_eq!(draft.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(GENESIS_PREVIOUS_HASH.len(), 64);
    }

    #[test]
    fn test_draft_after_tail_links_to_it() {
        let tail = Block {
            sequence_number: 7,
            owner_id: OwnerId::from("u1"),
            payload: record(),
            created_at: "2024-03-01 10:00:00".to_string(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 12,
            difficulty: 1,
            hash: "0abc".to_string(),
        };

        let draft = Draft::after(Some(&tail), OwnerId::from("u1"), record(), timestamp_now(), 1);

        assert_eq!(draft.sequence_number, 8);
        assert_eq!(draft.previous_hash, "0abc");
    }

    #[test]
    fn test_status_and_owner_parsing() {
        assert_eq!("Completed".parse::<SessionStatus>(), Ok(SessionStatus::Completed));
        assert!("done".parse::<SessionStatus>().is_err());
        assert_eq!("".parse::<OwnerId>(), Err(PayloadError::EmptyOwner));
        assert_eq!(" u1 ".parse::<OwnerId>(), Ok(OwnerId::from("u1")));
    }

    #[test]
    fn test_deserialized_owner_is_validated() {
        let owner: OwnerId = serde_json::from_str("\" u1 \"").unwrap();

        assert_eq!(owner.as_str(), "u1");
        assert!(serde_json::from_str::<OwnerId>("\"   \"").is_err());
        assert!(serde_json::from_str::<OwnerId>("\"\"").is_err());
    }

    #[test]
    fn test_timestamp_format() {
        let now = timestamp_now();

        assert_eq!(now.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(&now, TIMESTAMP_FORMAT).is_ok());
    }
}
