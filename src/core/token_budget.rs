// src/core/token_budget.rs — Token budget accounting across both model channels

use super::types::Task;

/// Spending against an optional task-level token cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub limit: Option<u64>,
    pub spent: u64,
}

impl TokenBudget {
    pub fn new(limit: Option<u64>, spent: u64) -> Self {
        Self { limit, spent }
    }

    /// Budget state of a task: target plus optimization totals.
    pub fn for_task(task: &Task) -> Self {
        Self::new(task.token_budget, task.total_tokens())
    }

    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|l| l.saturating_sub(self.spent))
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|l| self.spent >= l)
    }

    /// Fraction of the budget used, if capped.
    pub fn used_fraction(&self) -> Option<f64> {
        self.limit
            .filter(|l| *l > 0)
            .map(|l| self.spent as f64 / l as f64)
    }
}

impl std::fmt::Display for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.limit {
            Some(limit) => write!(f, "{} / {} tokens", self.spent, limit),
            None => write!(f, "{} tokens (no budget)", self.spent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncapped_never_exhausted() {
        let b = TokenBudget::new(None, 1_000_000);
        assert!(!b.is_exhausted());
        assert_eq!(b.remaining(), None);
        assert_eq!(b.to_string(), "1000000 tokens (no budget)");
    }

    #[test]
    fn test_exhausted_at_limit() {
        let b = TokenBudget::new(Some(100), 100);
        assert!(b.is_exhausted());
        assert_eq!(b.remaining(), Some(0));
    }

    #[test]
    fn test_overspend_saturates() {
        let b = TokenBudget::new(Some(100), 150);
        assert_eq!(b.remaining(), Some(0));
        assert!((b.used_fraction().unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_display_capped() {
        assert_eq!(TokenBudget::new(Some(500), 20).to_string(), "20 / 500 tokens");
    }
}
