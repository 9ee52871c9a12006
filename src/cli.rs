//! Text rendering for the command-line tools.

use study_chain::ledger::{Block, ChainStats, OwnerId, ValidationReport};

const RULE_WIDTH: usize = 74;

/// Inner width of a block frame; wide enough for a full hash
const FRAME_WIDTH: usize = 72;

fn heading(title: &str) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    format!("{}\n{}\n{}\n", rule, title, rule)
}

/// Verification report for a set of chains
pub fn render_verification(reports: &[(OwnerId, ValidationReport)]) -> String {
    let mut out = heading("CHAIN VERIFICATION REPORT");

    for (owner, report) in reports {
        let status = if report.is_valid() { "VALID" } else { "INVALID" };
        out.push_str(&format!(
            "Owner: {}\nStatus: {}\nMessage: {}\n",
            owner,
            status,
            report.summary()
        ));
        if let Some(first) = report.first_invalid() {
            out.push_str(&format!("First invalid block: #{}\nErrors:\n", first));
            for violation in &report.violations {
                out.push_str(&format!("  - {}\n", violation));
            }
        }
        out.push_str(&"-".repeat(RULE_WIDTH));
        out.push('\n');
    }

    let valid = reports.iter().filter(|(_, report)| report.is_valid()).count();
    out.push_str(&format!("Summary: {}/{} chains are valid\n", valid, reports.len()));
    out
}

/// Statistics block for one chain
pub fn render_stats(stats: &ChainStats) -> String {
    let mut lines = vec![format!("Owner: {}", stats.owner_id)];

    if stats.total_blocks == 0 {
        lines.push("  No blocks".to_string());
        return lines.join("\n") + "\n";
    }

    let subjects: Vec<&str> = stats.minutes_by_subject.keys().map(String::as_str).collect();
    lines.push(format!("  Total Blocks: {}", stats.total_blocks));
    lines.push(format!(
        "  Completed: {} | Pending: {}",
        stats.completed_sessions, stats.pending_sessions
    ));
    lines.push(format!(
        "  Total Study Time: {} minutes ({:.1} hours)",
        stats.total_minutes,
        stats.total_minutes as f64 / 60.0
    ));
    lines.push(format!("  Average Nonce: {:.0}", stats.average_nonce));
    lines.push(format!("  Subjects: {}", subjects.join(", ")));
    if let Some(subject) = &stats.favorite_subject {
        lines.push(format!("  Favorite Subject: {}", subject));
    }
    lines.push(format!("  Streak: {} day(s)", stats.streak_days));
    if let (Some(sequence_number), Some(hash)) = (stats.latest_sequence_number, &stats.latest_hash) {
        lines.push(format!("  Latest Block: #{}", sequence_number));
        lines.push(format!("  Latest Hash: {}...", &hash[..hash.len().min(16)]));
    }
    let status = if stats.chain_valid { "Valid" } else { "Invalid" };
    lines.push(format!("  Chain Status: {}", status));

    lines.join("\n") + "\n"
}

fn frame_row(text: &str) -> String {
    format!("│ {:<width$} │\n", text, width = FRAME_WIDTH)
}

fn frame_rule(left: char, right: char) -> String {
    format!("{}{}{}\n", left, "─".repeat(FRAME_WIDTH + 2), right)
}

fn render_block(block: &Block) -> String {
    let label = if block.is_genesis() {
        format!("Block #{} (genesis)", block.sequence_number)
    } else {
        format!("Block #{}", block.sequence_number)
    };

    let mut out = frame_rule('┌', '┐');
    out.push_str(&frame_row(&label));
    out.push_str(&frame_rule('├', '┤'));
    out.push_str(&frame_row(&format!("Created: {}", block.created_at)));
    out.push_str(&frame_row(&format!("Date: {}", block.payload.date)));
    out.push_str(&frame_row(&format!("Subject: {}", block.payload.subject)));
    out.push_str(&frame_row(&format!("Duration: {} min", block.payload.duration_minutes)));
    out.push_str(&frame_row(&format!("Status: {}", block.payload.status)));
    if let Some(original) = block.payload.supersedes {
        out.push_str(&frame_row(&format!("Supersedes: #{}", original)));
    }
    out.push_str(&frame_row(&format!(
        "Nonce: {} (difficulty {})",
        block.nonce, block.difficulty
    )));
    out.push_str(&frame_rule('├', '┤'));
    out.push_str(&frame_row(&format!("Hash: {}", block.hash)));
    out.push_str(&frame_row(&format!("Prev: {}", block.previous_hash)));
    out.push_str(&frame_rule('└', '┘'));
    out.push_str("      │\n      ↓\n");
    out
}

/// ASCII diagram of a chain, one frame per block
pub fn render_chain(owner: &OwnerId, blocks: &[Block]) -> String {
    let mut out = heading(&format!("CHAIN VISUALIZATION - {}", owner));
    for block in blocks {
        out.push_str(&render_block(block));
    }
    out.push_str(&format!("   [END OF CHAIN - {} blocks]\n", blocks.len()));
    out
}
