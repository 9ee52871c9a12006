//! Full-chain integrity checks.
//!
//! Every block is checked for four things: its stored hash matches its
//! content, the hash carries the proof of work its difficulty asks for, its
//! `previous_hash` links to its predecessor, and its sequence number follows
//! on. All violations are collected; verification never stops early and never
//! touches the chain.
//!
//! A link holds when `previous_hash` equals both the predecessor's stored hash
//! and its *chain-recomputed* hash: the digest of the predecessor with its own
//! `previous_hash` replaced by the chain-recomputed hash of the block before
//! it. On an untampered chain the two agree. Once a block has been altered,
//! every later block reports a broken link, which pinpoints where tampering
//! began. A block gets at most one broken link report.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::{Block, OwnerId, GENESIS_PREVIOUS_HASH, GENESIS_SEQUENCE};
use super::hasher;

/// The check a block failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The stored hash does not match the block's content
    HashMismatch { stored: String, computed: String },

    /// The recomputed hash lacks the leading zeros its difficulty requires
    InsufficientWork { difficulty: u32, leading_zeros: usize },

    /// `previous_hash` does not match the predecessor
    BrokenLink { expected: String, found: String },

    /// The sequence number does not follow its predecessor
    SequenceGap { expected: u64, found: u64 },

    /// The block belongs to another owner's chain
    OwnerMismatch { expected: OwnerId, found: OwnerId },
}

impl ViolationKind {
    fn describe(&self) -> String {
        match self {
            ViolationKind::HashMismatch { .. } => "Invalid hash".to_string(),
            ViolationKind::InsufficientWork { difficulty, .. } => {
                format!("Doesn't meet difficulty requirement of {}", difficulty)
            }
            ViolationKind::BrokenLink { .. } => "Broken chain link".to_string(),
            ViolationKind::SequenceGap { expected, found } => {
                format!("Expected sequence number {}, found {}", expected, found)
            }
            ViolationKind::OwnerMismatch { expected, found } => {
                format!("Owned by {} instead of {}", found, expected)
            }
        }
    }
}

/// A failed check at one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Violation {
    /// Sequence number of the offending block
    pub sequence_number: u64,

    /// Which check failed
    pub kind: ViolationKind,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block {}: {}", self.sequence_number, self.kind.describe())
    }
}

/// Outcome of verifying a chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationReport {
    /// Number of blocks examined
    pub blocks_checked: usize,

    /// Every violation found, in chain order
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// One-line human readable verdict
    pub fn summary(&self) -> String {
        if self.blocks_checked == 0 {
            "No blocks to verify".to_string()
        } else if self.is_valid() {
            "Blockchain is valid".to_string()
        } else {
            format!("Found {} error(s)", self.violations.len())
        }
    }

    /// Violations reported for the block at `sequence_number`
    pub fn violations_at(&self, sequence_number: u64) -> Vec<&Violation> {
        self.violations
            .iter()
            .filter(|violation| violation.sequence_number == sequence_number)
            .collect()
    }

    /// Sequence number of the earliest block with a violation
    pub fn first_invalid(&self) -> Option<u64> {
        self.violations.first().map(|violation| violation.sequence_number)
    }
}

/// Verifies an ordered chain of blocks
///
/// An empty chain is valid. The blocks must be given in stored order; they are
/// not re-sorted, so reordering shows up as sequence and linkage violations.
pub fn verify_chain(blocks: &[Block]) -> ValidationReport {
    let mut violations = Vec::new();
    let owner = blocks.first().map(|block| &block.owner_id);

    let mut expected_sequence = GENESIS_SEQUENCE;
    let mut expected_previous = GENESIS_PREVIOUS_HASH.to_string();
    let mut stored_previous: &str = GENESIS_PREVIOUS_HASH;

    for block in blocks {
        let sequence_number = block.sequence_number;
        let mut report = |kind| violations.push(Violation { sequence_number, kind });

        if let Some(owner) = owner {
            if &block.owner_id != owner {
                report(ViolationKind::OwnerMismatch {
                    expected: owner.clone(),
                    found: block.owner_id.clone(),
                });
            }
        }

        if sequence_number != expected_sequence {
            report(ViolationKind::SequenceGap {
                expected: expected_sequence,
                found: sequence_number,
            });
        }

        let computed = block.calculate_hash();
        if computed != block.hash {
            report(ViolationKind::HashMismatch {
                stored: block.hash.clone(),
                computed: computed.clone(),
            });
        }

        if !hasher::meets_difficulty(&computed, block.difficulty) {
            report(ViolationKind::InsufficientWork {
                difficulty: block.difficulty,
                leading_zeros: hasher::leading_zeros(&computed),
            });
        }

        if block.previous_hash != stored_previous {
            report(ViolationKind::BrokenLink {
                expected: stored_previous.to_string(),
                found: block.previous_hash.clone(),
            });
        } else if block.previous_hash != expected_previous {
            report(ViolationKind::BrokenLink {
                expected: expected_previous.clone(),
                found: block.previous_hash.clone(),
            });
        }

        let rebuilt = if block.previous_hash == expected_previous {
            computed
        } else {
            hasher::calculate_hash(
                &block.content().with_previous_hash(&expected_previous),
                block.nonce,
            )
        };

        expected_sequence = sequence_number.saturating_add(1);
        expected_previous = rebuilt;
        stored_previous = block.hash.as_str();
    }

    ValidationReport {
        blocks_checked: blocks.len(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::block::SessionStatus;
    use crate::ledger::store::tests::mined_block;

    fn chain(len: usize) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::with_capacity(len);
        for i in 0..len {
            let block = mined_block(blocks.last(), "u1", &format!("Subject {}", i));
            blocks.push(block);
        }
        blocks
    }

    fn kinds_at(report: &ValidationReport, sequence_number: u64) -> Vec<&ViolationKind> {
        report
            .violations_at(sequence_number)
            .into_iter()
            .map(|violation| &violation.kind)
            .collect()
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let report = verify_chain(&[]);

        assert!(report.is_valid());
        assert_eq!(report.blocks_checked, 0);
        assert_eq!(report.summary(), "No blocks to verify");
    }

    #[test]
    fn test_untampered_chain_is_valid() {
        let blocks = chain(5);

        let report = verify_chain(&blocks);

        assert!(report.is_valid());
        assert_eq!(report.blocks_checked, 5);
        assert_eq!(report.summary(), "Blockchain is valid");
    }

    #[test]
    fn test_tampered_payload_cascades() {
        let mut blocks = chain(5);
        blocks[2].payload.duration_minutes = 600;

        let report = verify_chain(&blocks);

        assert!(!report.is_valid());
        assert_eq!(report.first_invalid(), Some(2));
        assert!(report.violations_at(0).is_empty());
        assert!(report.violations_at(1).is_empty());
        assert!(kinds_at(&report, 2)
            .iter()
            .any(|kind| matches!(kind, ViolationKind::HashMismatch { .. })));
        for sequence_number in 3..5 {
            let kinds = kinds_at(&report, sequence_number);
            assert!(kinds
                .iter()
                .any(|kind| matches!(kind, ViolationKind::BrokenLink { .. })));
            assert!(!kinds
                .iter()
                .any(|kind| matches!(kind, ViolationKind::HashMismatch { .. })));
        }
    }

    #[test]
    fn test_tampered_status_is_detected() {
        let mut blocks = chain(2);
        blocks[0].payload.status = SessionStatus::Completed;

        let report = verify_chain(&blocks);

        assert_eq!(report.first_invalid(), Some(0));
        assert!(kinds_at(&report, 1)
            .iter()
            .any(|kind| matches!(kind, ViolationKind::BrokenLink { .. })));
    }

    #[test]
    fn test_replaced_hash_breaks_following_link() {
        let mut blocks = chain(3);
        let mut forged = blocks[1].hash.clone();
        let last = if forged.ends_with('0') { "1" } else { "0" };
        forged.replace_range(63.., last);
        blocks[1].hash = forged;

        let report = verify_chain(&blocks);

        assert!(kinds_at(&report, 1)
            .iter()
            .any(|kind| matches!(kind, ViolationKind::HashMismatch { .. })));
        assert!(kinds_at(&report, 2)
            .iter()
            .any(|kind| matches!(kind, ViolationKind::BrokenLink { .. })));
    }

    #[test]
    fn test_overwritten_hash_reports_one_link_violation() {
        let mut blocks = chain(3);
        blocks[1].hash = "f".repeat(64);

        let report = verify_chain(&blocks);

        let broken: Vec<_> = kinds_at(&report, 2)
            .into_iter()
            .filter(|kind| matches!(kind, ViolationKind::BrokenLink { .. }))
            .collect();
        assert_eq!(
            broken,
            vec![&ViolationKind::BrokenLink {
                expected: "f".repeat(64),
                found: blocks[2].previous_hash.clone()
            }]
        );
        assert!(!kinds_at(&report, 2)
            .iter()
            .any(|kind| matches!(kind, ViolationKind::HashMismatch { .. })));
    }

    #[test]
    fn test_tampered_block_reports_one_link_violation_per_block() {
        let mut blocks = chain(4);
        blocks[1].payload.subject = "Forged".to_string();
        blocks[1].hash = blocks[1].calculate_hash();

        let report = verify_chain(&blocks);

        for sequence_number in 2..4 {
            let broken = kinds_at(&report, sequence_number)
                .into_iter()
                .filter(|kind| matches!(kind, ViolationKind::BrokenLink { .. }))
                .count();
            assert_eq!(broken, 1);
        }
    }

    #[test]
    fn test_missing_block_is_a_gap() {
        let mut blocks = chain(4);
        blocks.remove(1);

        let report = verify_chain(&blocks);

        let kinds = kinds_at(&report, 2);
        assert!(kinds.contains(&&ViolationKind::SequenceGap {
            expected: 1,
            found: 2
        }));
        assert!(kinds
            .iter()
            .any(|kind| matches!(kind, ViolationKind::BrokenLink { .. })));
        // Block 3 still follows block 2.
        assert!(!kinds_at(&report, 3)
            .iter()
            .any(|kind| matches!(kind, ViolationKind::SequenceGap { .. })));
    }

    #[test]
    fn test_genesis_must_start_at_zero() {
        let blocks = chain(2);

        let report = verify_chain(&blocks[1..]);

        assert!(kinds_at(&report, 1).contains(&&ViolationKind::SequenceGap {
            expected: 0,
            found: 1
        }));
        assert!(kinds_at(&report, 1).contains(&&ViolationKind::BrokenLink {
            expected: GENESIS_PREVIOUS_HASH.to_string(),
            found: blocks[0].hash.clone()
        }));
    }

    #[test]
    fn test_raised_difficulty_fails_work_check() {
        let mut blocks = chain(1);
        // Re-seal with no work at all, then claim a higher difficulty.
        blocks[0].difficulty = 0;
        blocks[0].nonce = 0;
        blocks[0].hash = blocks[0].calculate_hash();
        let valid_without_work = verify_chain(&blocks);
        blocks[0].difficulty = 64;

        let report = verify_chain(&blocks);

        assert!(valid_without_work.is_valid());
        assert!(kinds_at(&report, 0)
            .iter()
            .any(|kind| matches!(kind, ViolationKind::InsufficientWork { difficulty: 64, .. })));
    }

    #[test]
    fn test_foreign_block_is_reported() {
        let mut blocks = chain(2);
        blocks[1].owner_id = OwnerId::from("u2");

        let report = verify_chain(&blocks);

        assert!(kinds_at(&report, 1).contains(&&ViolationKind::OwnerMismatch {
            expected: OwnerId::from("u1"),
            found: OwnerId::from("u2")
        }));
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            sequence_number: 3,
            kind: ViolationKind::BrokenLink {
                expected: "a".to_string(),
                found: "b".to_string(),
            },
        };

        assert_eq!(violation.to_string(), "Block 3: Broken chain link");
    }
}
