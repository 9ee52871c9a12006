use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ledger::{Block, OwnerId, PayloadError, SessionRecord, SessionStatus, ValidationReport, Violation};

/// Unit of the `duration` field of a session request
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    #[default]
    Minutes,
    Hours,
}

impl DurationUnit {
    /// Converts `duration` in this unit to minutes
    pub fn to_minutes(self, duration: u32) -> Result<u32, PayloadError> {
        match self {
            DurationUnit::Minutes => Ok(duration),
            DurationUnit::Hours => duration
                .checked_mul(60)
                .ok_or(PayloadError::DurationTooLong(duration)),
        }
    }
}

/// Request for recording a study session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionRequest {
    /// Day of the session, today when omitted
    #[schema(value_type = Option<String>, example = "2024-03-01")]
    #[serde(default)]
    pub date: Option<NaiveDate>,

    /// What was studied
    pub subject: String,

    /// Length of the session
    pub duration: u32,

    /// Unit of `duration`
    #[serde(default)]
    pub duration_unit: DurationUnit,

    /// Whether the session is done
    #[serde(default)]
    pub status: SessionStatus,
}

impl SessionRequest {
    /// Builds a validated session record
    ///
    /// # Arguments
    ///
    /// * `today` - The date used when the request names none
    pub fn into_record(self, today: NaiveDate) -> Result<SessionRecord, PayloadError> {
        let minutes = self.duration_unit.to_minutes(self.duration)?;
        let record = SessionRecord::new(self.date.unwrap_or(today), &self.subject, minutes, self.status);
        record.validate()?;
        Ok(record)
    }
}

/// Response for the chain endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The owner of the chain
    pub owner_id: OwnerId,

    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Response for endpoints that add a block
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlockResponse {
    /// The message
    pub message: String,

    /// The stored block
    pub block: Block,
}

/// Verification outcome of one chain
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerificationResponse {
    pub owner_id: OwnerId,

    pub valid: bool,

    /// One-line verdict
    pub message: String,

    pub blocks_checked: usize,

    /// Every failed check, in chain order
    pub violations: Vec<Violation>,
}

impl VerificationResponse {
    pub fn new(owner_id: OwnerId, report: ValidationReport) -> Self {
        VerificationResponse {
            owner_id,
            valid: report.is_valid(),
            message: report.summary(),
            blocks_checked: report.blocks_checked,
            violations: report.violations,
        }
    }
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// What went wrong
    pub error: String,

    /// A mined block that could not be stored; post it to the append endpoint to retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(duration: u32, unit: DurationUnit) -> SessionRequest {
        SessionRequest {
            date: None,
            subject: " Math ".to_string(),
            duration,
            duration_unit: unit,
            status: SessionStatus::Completed,
        }
    }

    #[test]
    fn test_hours_are_converted() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let record = request(2, DurationUnit::Hours).into_record(today).unwrap();

        assert_eq!(record.duration_minutes, 120);
        assert_eq!(record.subject, "Math");
        assert_eq!(record.date, today);
    }

    #[test]
    fn test_invalid_requests_are_rejected() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        assert_eq!(
            request(0, DurationUnit::Minutes).into_record(today),
            Err(PayloadError::ZeroDuration)
        );
        assert_eq!(
            request(u32::MAX, DurationUnit::Hours).into_record(today),
            Err(PayloadError::DurationTooLong(u32::MAX))
        );
    }

    #[test]
    fn test_request_defaults() {
        let json = r#"{"subject": "Physics", "duration": 30}"#;

        let request: SessionRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.date, None);
        assert_eq!(request.duration_unit, DurationUnit::Minutes);
        assert_eq!(request.status, SessionStatus::Pending);
    }
}
