use async_trait::async_trait;
use chrono::Utc;

use amb_core::{
    directory::AdminDirectory,
    domain::{AccountId, Handle},
    Error, Result,
};

use crate::{db_err, SqliteStore};

#[async_trait]
impl AdminDirectory for SqliteStore {
    async fn is_admin(&self, handle: &Handle) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM admins WHERE handle = ?")
            .bind(handle.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    async fn is_super_admin(&self, handle: &Handle) -> Result<bool> {
        let found =
            sqlx::query_scalar::<_, i64>("SELECT 1 FROM admins WHERE handle = ? AND is_super = 1")
                .bind(handle.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(found.is_some())
    }

    async fn grant_admin(&self, handle: &Handle, super_admin: bool) -> Result<bool> {
        let done = sqlx::query(
            "INSERT OR IGNORE INTO admins (handle, is_super, created_at) \
             SELECT handle, ?, ? FROM users WHERE handle = ?",
        )
        .bind(super_admin)
        .bind(Utc::now())
        .bind(handle.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if done.rows_affected() == 1 {
            return Ok(true);
        }
        // Nothing inserted: either already an admin or no such account.
        if self.is_admin(handle).await? {
            Ok(false)
        } else {
            Err(Error::NotFound(format!("user @{handle}")))
        }
    }

    async fn revoke_admin(&self, handle: &Handle) -> Result<bool> {
        let done = sqlx::query("DELETE FROM admins WHERE handle = ? AND is_super = 0")
            .bind(handle.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(done.rows_affected() > 0)
    }

    async fn admin_account_ids(&self) -> Result<Vec<AccountId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT u.account_id FROM admins a JOIN users u ON u.handle = a.handle \
             WHERE u.account_id IS NOT NULL ORDER BY a.created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(ids.into_iter().map(AccountId).collect())
    }
}
