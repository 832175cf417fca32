use async_trait::async_trait;
use chrono::Utc;

use amb_core::{
    directory::ReportStore,
    domain::{NewReport, Report},
    Result,
};

use crate::{db_err, SqliteStore};

#[async_trait]
impl ReportStore for SqliteStore {
    async fn insert_report(&self, report: NewReport) -> Result<Report> {
        let created_at = Utc::now();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO reports \
             (reporter_account_id, reported_account_id, reported_handle, reason, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(report.reporter_account_id.0)
        .bind(report.reported_account_id.map(|id| id.0))
        .bind(report.reported_handle.as_str())
        .bind(&report.reason)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Report {
            id,
            reporter_account_id: report.reporter_account_id,
            reported_account_id: report.reported_account_id,
            reported_handle: report.reported_handle,
            reason: report.reason,
            created_at,
        })
    }
}
