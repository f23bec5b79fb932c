//! Session-wide token accounting

use cairn_ai::Usage;
use serde::{Deserialize, Serialize};

/// Token totals for a whole session, added to once per turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
    pub thought: u64,
    /// Sum of input and output across turns
    pub total: u64,
}

impl TokenUsage {
    /// Add the usage reported for one turn
    pub fn add(&mut self, turn: &Usage) {
        let input = u64::from(turn.input);
        let output = u64::from(turn.output);
        self.input += input;
        self.output += output;
        self.cached += u64::from(turn.cache_read);
        self.thought += u64::from(turn.thinking);
        self.total += input + output;
    }

    /// One-line summary for the end of a session
    pub fn summary(&self, cost: f64) -> String {
        let mut line = format!("{} in · {} out", self.input, self.output);
        if self.cached > 0 {
            line.push_str(&format!(" · {} cached", self.cached));
        }
        if self.thought > 0 {
            line.push_str(&format!(" · {} thinking", self.thought));
        }
        if cost > 0.0 {
            line.push_str(&format!(" · ${:.4}", cost));
        }
        line
    }
}
