//! Model availability as reported by upstream rate-limit responses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use tl_core::error::Recoverable;

/// Answers "when was this model last rate-limited?".
#[async_trait]
pub trait AvailabilityOracle: Send + Sync {
    async fn last_rate_limited(&self, model: &str) -> Recoverable<Option<DateTime<Utc>>>;
}

/// In-process ledger of rate-limit reports, keyed by model name.
#[derive(Debug, Default)]
pub struct RateLimitLedger {
    reports: DashMap<String, DateTime<Utc>>,
}

impl RateLimitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rate-limit hit. Keeps the most recent report per model.
    pub fn record(&self, model: &str, at: DateTime<Utc>) {
        self.reports
            .entry(model.to_string())
            .and_modify(|seen| {
                if at > *seen {
                    *seen = at;
                }
            })
            .or_insert(at);
    }

    pub fn clear(&self, model: &str) {
        self.reports.remove(model);
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[async_trait]
impl AvailabilityOracle for RateLimitLedger {
    async fn last_rate_limited(&self, model: &str) -> Recoverable<Option<DateTime<Utc>>> {
        Ok(self.reports.get(model).map(|r| *r.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ledger_keeps_latest_report() {
        let ledger = RateLimitLedger::new();
        let now = Utc::now();
        ledger.record("m", now);
        ledger.record("m", now - chrono::Duration::hours(3));
        assert_eq!(ledger.last_rate_limited("m").await.unwrap(), Some(now));
        assert_eq!(ledger.last_rate_limited("other").await.unwrap(), None);

        ledger.clear("m");
        assert!(ledger.is_empty());
    }
}
