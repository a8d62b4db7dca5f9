//! Offline-first queue for cannot-patrol reports.
//!
//! A report is always written to the local store first, photo included.
//! Only then, and only when the client looks online, is it pushed to the
//! server. A failed push never undoes the local save.

use std::sync::Arc;

use chrono::Local;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::api::RemoteApi;
use crate::connectivity::Connectivity;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CannotPatrolReport, ReportInput, StoredReport};
use crate::session::{CredentialStore, read_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored locally and accepted by the server
    SavedAndSynced,
    /// Stored locally only; see the submission warning
    SavedOfflineOnly,
}

/// Result of a report submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub outcome: SubmitOutcome,
    pub report: CannotPatrolReport,
    pub warning: Option<String>,
}

impl Submission {
    fn offline(report: CannotPatrolReport, warning: impl Into<String>) -> Self {
        Self {
            outcome: SubmitOutcome::SavedOfflineOnly,
            report,
            warning: Some(warning.into()),
        }
    }
}

/// Result of pushing every pending report
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    pub synced: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

pub struct ReportQueue<A> {
    api: Arc<A>,
    db: Arc<Database>,
    credentials: Arc<dyn CredentialStore>,
    connectivity: Arc<dyn Connectivity>,
    /// Held while reports are being uploaded
    upload_lock: AsyncMutex<()>,
}

impl<A: RemoteApi> ReportQueue<A> {
    pub fn new(
        api: Arc<A>,
        db: Arc<Database>,
        credentials: Arc<dyn CredentialStore>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            api,
            db,
            credentials,
            connectivity,
            upload_lock: AsyncMutex::new(()),
        }
    }

    /// Save a report locally, then try to push it.
    ///
    /// Fails only when the input is invalid or the local save fails.
    pub async fn submit_report(&self, input: ReportInput) -> Result<Submission> {
        validate(&input)?;

        let report = CannotPatrolReport::new(input, Local::now());
        let db = Arc::clone(&self.db);
        let to_store = report.clone();
        tokio::task::spawn_blocking(move || db.insert_report(&to_store))
            .await?
            .map_err(|e| match e {
                Error::PersistenceError(_) => e,
                other => Error::PersistenceError(other.to_string()),
            })?;

        tracing::info!(report_id = %report.id, status = %report.status, "Report saved locally");

        // A flush running now must not pick this report up while it uploads.
        let _guard = self.upload_lock.lock().await;

        if !self.is_online().await {
            tracing::info!(report_id = %report.id, "Offline, report kept for later sync");
            return Ok(Submission::offline(
                report,
                "Data saved locally. Will sync when online.",
            ));
        }

        let token = match read_token(self.credentials.as_ref()) {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Ok(Submission::offline(
                    report,
                    "Data saved locally. Log in to sync it to the server.",
                ));
            }
            Err(e) => {
                return Ok(Submission::offline(
                    report,
                    format!("Data saved locally, but the session could not be read: {e}"),
                ));
            }
        };

        match self.push(&token, &report).await {
            Ok(warning) => Ok(Submission {
                outcome: SubmitOutcome::SavedAndSynced,
                report,
                warning,
            }),
            Err(e) => {
                tracing::warn!(report_id = %report.id, error = %e, "Report saved locally but not synced");
                Ok(Submission::offline(
                    report,
                    format!("Data saved locally, but couldn't sync to server: {e}"),
                ))
            }
        }
    }

    /// Push every report the server has not accepted yet, oldest first.
    ///
    /// Not run automatically: callers decide when to retry. Stops at the first
    /// authentication failure so a stale token is never reused.
    pub async fn flush_pending(&self) -> Result<FlushReport> {
        let _guard = self.upload_lock.lock().await;

        if !self.is_online().await {
            return Err(Error::Network("client is offline".to_string()));
        }
        let token = read_token(self.credentials.as_ref())?.ok_or(Error::Unauthenticated)?;

        let pending = self.pending_reports().await?;
        tracing::info!(pending = pending.len(), "Flushing pending reports");

        let mut result = FlushReport::default();
        for stored in pending {
            let id = stored.report.id;
            match self.push(&token, &stored.report).await {
                Ok(_) => result.synced.push(id),
                Err(Error::Unauthenticated) => return Err(Error::Unauthenticated),
                Err(e) => {
                    tracing::warn!(report_id = %id, error = %e, "Report sync failed");
                    result.failed.push((id, e.to_string()));
                }
            }
        }

        tracing::info!(
            synced = result.synced.len(),
            failed = result.failed.len(),
            "Pending reports flushed"
        );
        Ok(result)
    }

    pub async fn pending_reports(&self) -> Result<Vec<StoredReport>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.pending_reports()).await?
    }

    pub async fn list_reports(&self) -> Result<Vec<StoredReport>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.list_reports()).await?
    }

    /// Probes can block on DNS and connects, so they run off the async workers.
    async fn is_online(&self) -> bool {
        let connectivity = Arc::clone(&self.connectivity);
        match tokio::task::spawn_blocking(move || connectivity.is_online()).await {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!(error = %e, "Connectivity check did not complete, assuming offline");
                false
            }
        }
    }

    /// Upload one report and record it as synced. A failure to record the
    /// sync state is returned as a warning, since the server already has it.
    async fn push(&self, token: &str, report: &CannotPatrolReport) -> Result<Option<String>> {
        self.api.submit_report(token, report).await?;

        let db = Arc::clone(&self.db);
        let id = report.id;
        match tokio::task::spawn_blocking(move || db.mark_report_synced(id)).await? {
            Ok(()) => Ok(None),
            Err(e) => {
                tracing::error!(report_id = %id, error = %e, "Report uploaded but sync state not recorded");
                Ok(Some(format!("Report uploaded, but its sync state was not saved: {e}")))
            }
        }
    }
}

fn validate(input: &ReportInput) -> Result<()> {
    if input.photo.is_empty() {
        return Err(Error::ValidationError("No image captured".to_string()));
    }
    if input.reason.trim().is_empty() {
        return Err(Error::ValidationError("Reason is required".to_string()));
    }
    Ok(())
}
