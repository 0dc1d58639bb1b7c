use std::sync::Arc;

use chrono::Duration;

use crate::modules::auth::interface::{Result, SessionRepository, VerificationCodeRepository};
use crate::services::clock::Clock;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: u64,
    pub codes: u64,
}

/// Deletes dead sessions and codes. Run from a scheduler, never from a
/// request handler.
pub struct MaintenanceService {
    sessions: Arc<dyn SessionRepository>,
    codes: Arc<dyn VerificationCodeRepository>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl MaintenanceService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        codes: Arc<dyn VerificationCodeRepository>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            sessions,
            codes,
            clock,
            retention,
        }
    }

    pub async fn purge_stale(&self) -> Result<PurgeReport> {
        let before = self.clock.now() - self.retention;
        let report = PurgeReport {
            sessions: self.sessions.delete_stale(before).await?,
            codes: self.codes.delete_stale(before).await?,
        };
        tracing::info!(
            sessions = report.sessions,
            codes = report.codes,
            %before,
            "stale rows purged"
        );
        Ok(report)
    }
}
