use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::block::{timestamp_now, Block, OwnerId, SessionStatus};
use super::verifier::{ValidationReport, Violation};

/// Summary of one owner's study chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChainStats {
    pub owner_id: OwnerId,

    /// Number of blocks in the chain
    pub total_blocks: usize,

    /// Sessions not amended by a later block
    pub total_sessions: usize,

    pub completed_sessions: usize,

    pub pending_sessions: usize,

    /// Minutes across all sessions
    pub total_minutes: u64,

    /// Mean session length in minutes
    pub average_minutes: f64,

    /// Mean nonce found while mining, a rough measure of work spent
    pub average_nonce: f64,

    /// Minutes studied per subject
    pub minutes_by_subject: BTreeMap<String, u64>,

    /// Subject with the most minutes
    pub favorite_subject: Option<String>,

    /// Consecutive days with a session, ending today
    pub streak_days: u32,

    pub latest_sequence_number: Option<u64>,

    pub latest_hash: Option<String>,

    pub chain_valid: bool,
}

/// Blocks whose session has not been amended by a later block
///
/// A completion appends a new block that supersedes the original; only the
/// newest version of each session is counted.
pub fn effective_sessions(blocks: &[Block]) -> Vec<&Block> {
    let superseded: HashSet<u64> = blocks
        .iter()
        .filter_map(|block| block.payload.supersedes)
        .collect();

    blocks
        .iter()
        .filter(|block| !superseded.contains(&block.sequence_number))
        .collect()
}

/// Number of consecutive days, ending at `today`, with at least one session
pub fn streak_days(dates: impl IntoIterator<Item = NaiveDate>, today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = dates.into_iter().collect();

    let mut streak = 0;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        day = day - Duration::days(1);
    }
    streak
}

impl ChainStats {
    pub fn from_chain(
        owner: &OwnerId,
        blocks: &[Block],
        report: &ValidationReport,
        today: NaiveDate,
    ) -> Self {
        let sessions = effective_sessions(blocks);

        let completed_sessions = sessions
            .iter()
            .filter(|block| block.payload.status == SessionStatus::Completed)
            .count();
        let total_minutes: u64 = sessions
            .iter()
            .map(|block| u64::from(block.payload.duration_minutes))
            .sum();

        let mut minutes_by_subject: BTreeMap<String, u64> = BTreeMap::new();
        for block in &sessions {
            *minutes_by_subject
                .entry(block.payload.subject.clone())
                .or_insert(0) += u64::from(block.payload.duration_minutes);
        }
        // Ties go to the alphabetically first subject.
        let favorite_subject = minutes_by_subject
            .iter()
            .fold(None, |best: Option<(&String, u64)>, (subject, minutes)| match best {
                Some((_, top)) if top >= *minutes => best,
                _ => Some((subject, *minutes)),
            })
            .map(|(subject, _)| subject.clone());

        let average = |total: f64, count: usize| if count == 0 { 0.0 } else { total / count as f64 };
        let nonce_total: f64 = blocks.iter().map(|block| block.nonce as f64).sum();

        ChainStats {
            owner_id: owner.clone(),
            total_blocks: blocks.len(),
            total_sessions: sessions.len(),
            completed_sessions,
            pending_sessions: sessions.len() - completed_sessions,
            total_minutes,
            average_minutes: average(total_minutes as f64, sessions.len()),
            average_nonce: average(nonce_total, blocks.len()),
            minutes_by_subject,
            favorite_subject,
            streak_days: streak_days(sessions.iter().map(|block| block.payload.date), today),
            latest_sequence_number: blocks.last().map(|block| block.sequence_number),
            latest_hash: blocks.last().map(|block| block.hash.clone()),
            chain_valid: report.is_valid(),
        }
    }
}

/// How the chain was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainSummary {
    pub total_blocks: usize,
    pub algorithm: String,
    pub consensus: String,
    /// Difficulty of the latest block
    pub difficulty: u32,
}

/// Result of verifying an exported chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExportVerification {
    pub valid: bool,
    pub message: String,
    pub violations: Vec<Violation>,
    pub verified_at: String,
}

/// A self-describing export of one owner's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainExport {
    pub owner_id: OwnerId,
    pub blockchain: ChainSummary,
    pub blocks: Vec<Block>,
    pub verification: ExportVerification,
}

impl ChainExport {
    pub fn new(owner: &OwnerId, blocks: Vec<Block>, report: ValidationReport) -> Self {
        let blockchain = ChainSummary {
            total_blocks: blocks.len(),
            algorithm: "SHA-256".to_string(),
            consensus: "Proof of Work".to_string(),
            difficulty: blocks.last().map(|block| block.difficulty).unwrap_or(0),
        };

        let verification = ExportVerification {
            valid: report.is_valid(),
            message: report.summary(),
            violations: report.violations,
            verified_at: timestamp_now(),
        };

        ChainExport {
            owner_id: owner.clone(),
            blockchain,
            blocks,
            verification,
        }
    }
}
