//! Per-user, per-model daily usage gating, kept behind a narrow trait so a real backing store can
//! be swapped in without touching the Agent Executor. The in-process implementation uses
//! `dashmap` for the one genuinely concurrent counter in the system.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::error::{AppError, AppResult};

#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// Checks the per-user, per-model, per-day counter before a provider call. Returns an error
    /// if the caller is already at or over the limit for today.
    async fn check(&self, user_id: &str, model: &str, limit: u32) -> AppResult<()>;

    /// Increments the counter after a successful provider call.
    async fn record_success(&self, user_id: &str, model: &str);
}

#[derive(Default)]
pub struct InMemoryQuotaGate {
    counters: DashMap<(String, String, NaiveDate), u32>,
}

impl InMemoryQuotaGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, model: &str) -> (String, String, NaiveDate) {
        (user_id.to_string(), model.to_string(), chrono::Utc::now().date_naive())
    }

    pub fn current_count(&self, user_id: &str, model: &str) -> u32 {
        self.counters.get(&Self::key(user_id, model)).map(|v| *v).unwrap_or(0)
    }
}

#[async_trait]
impl QuotaGate for InMemoryQuotaGate {
    async fn check(&self, user_id: &str, model: &str, limit: u32) -> AppResult<()> {
        let count = self.current_count(user_id, model);
        if count >= limit {
            return Err(AppError::QuotaExceeded { user_id: user_id.to_string(), model: model.to_string() });
        }
        Ok(())
    }

    async fn record_success(&self, user_id: &str, model: &str) {
        *self.counters.entry(Self::key(user_id, model)).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_calls_increment_the_counter_exactly_once_each() {
        let gate = InMemoryQuotaGate::new();
        for _ in 0..5 {
            gate.check("alice", "gpt-4o-mini", 10).await.unwrap();
            gate.record_success("alice", "gpt-4o-mini").await;
        }
        assert_eq!(gate.current_count("alice", "gpt-4o-mini"), 5);
    }

    #[tokio::test]
    async fn check_rejects_once_the_limit_is_reached() {
        let gate = InMemoryQuotaGate::new();
        for _ in 0..3 {
            gate.record_success("bob", "gemini-1.5-pro").await;
        }
        let result = gate.check("bob", "gemini-1.5-pro", 3).await;
        assert!(matches!(result, Err(AppError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn counters_are_independent_per_user_and_model() {
        let gate = InMemoryQuotaGate::new();
        gate.record_success("alice", "gpt-4o-mini").await;
        gate.record_success("alice", "gemini-1.5-pro").await;
        gate.record_success("bob", "gpt-4o-mini").await;
        assert_eq!(gate.current_count("alice", "gpt-4o-mini"), 1);
        assert_eq!(gate.current_count("alice", "gemini-1.5-pro"), 1);
        assert_eq!(gate.current_count("bob", "gpt-4o-mini"), 1);
    }
}
