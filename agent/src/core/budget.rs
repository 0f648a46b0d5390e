//! Round ceiling bookkeeping for the agent loop.

/// Counts rounds against a fixed ceiling.
///
/// Every completion request consumes one round, whether it ends in tool calls,
/// a corrective turn, or a final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundBudget {
    max_rounds: u32,
    used: u32,
}

impl RoundBudget {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            max_rounds,
            used: 0,
        }
    }

    /// Claim the next round. Returns its 1-indexed number, or `None` once the
    /// ceiling has been reached.
    pub fn next_round(&mut self) -> Option<u32> {
        if self.used >= self.max_rounds {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

}
