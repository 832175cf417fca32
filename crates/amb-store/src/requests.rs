use async_trait::async_trait;
use chrono::{DateTime, Utc};

use amb_core::{
    directory::ContactRequestStore,
    domain::{AccountId, ContactRequest, RequestId, RequestStatus},
    Error, Result,
};

use crate::{db_err, SqliteStore};

type RequestRow = (i64, i64, i64, String, DateTime<Utc>, Option<DateTime<Utc>>);

const SELECT_REQUEST: &str = "SELECT id, from_account_id, to_account_id, status, created_at, \
                              resolved_at FROM contact_requests";

fn request_from_row(
    (id, from, to, status, created_at, resolved_at): RequestRow,
) -> Result<ContactRequest> {
    Ok(ContactRequest {
        id: RequestId(id),
        from_account_id: AccountId(from),
        to_account_id: AccountId(to),
        status: status.parse()?,
        created_at,
        resolved_at,
    })
}

#[async_trait]
impl ContactRequestStore for SqliteStore {
    async fn insert_pending(&self, from: AccountId, to: AccountId) -> Result<ContactRequest> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO contact_requests (from_account_id, to_account_id, status, created_at) \
             VALUES (?, ?, 'pending', ?) RETURNING id",
        )
        .bind(from.0)
        .bind(to.0)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_err(e) {
            Error::Conflict(_) => Error::DuplicatePending,
            other => other,
        })?;

        self.find_request(RequestId(id))
            .await?
            .ok_or_else(|| Error::Persistence(format!("contact request {id} vanished")))
    }

    async fn find_request(&self, id: RequestId) -> Result<Option<ContactRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!("{SELECT_REQUEST} WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(request_from_row).transpose()
    }

    async fn find_pending_between(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<Option<ContactRequest>> {
        let sql = format!(
            "{SELECT_REQUEST} WHERE status = 'pending' AND \
             ((from_account_id = ? AND to_account_id = ?) OR \
              (from_account_id = ? AND to_account_id = ?)) LIMIT 1"
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(a.0)
            .bind(b.0)
            .bind(b.0)
            .bind(a.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(request_from_row).transpose()
    }

    async fn transition(&self, id: RequestId, status: RequestStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(
                "contact requests can only move to a terminal status".to_string(),
            ));
        }
        let done = sqlx::query(
            "UPDATE contact_requests SET status = ?, resolved_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(done.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::store_with;

    #[tokio::test]
    async fn pending_pair_is_unique_in_either_direction() {
        let store = store_with(&[]).await;
        let request = store.insert_pending(AccountId(1), AccountId(2)).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.resolved_at.is_none());

        assert!(matches!(
            store.insert_pending(AccountId(2), AccountId(1)).await,
            Err(Error::DuplicatePending)
        ));
        assert!(matches!(
            store.insert_pending(AccountId(1), AccountId(2)).await,
            Err(Error::DuplicatePending)
        ));

        let found = store
            .find_pending_between(AccountId(2), AccountId(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, request.id);

        // Other pairs are independent.
        store.insert_pending(AccountId(1), AccountId(3)).await.unwrap();
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = store_with(&[]).await;
        let request = store.insert_pending(AccountId(1), AccountId(2)).await.unwrap();

        assert!(store
            .transition(request.id, RequestStatus::Accepted)
            .await
            .unwrap());
        assert!(!store
            .transition(request.id, RequestStatus::Rejected)
            .await
            .unwrap());

        let stored = store.find_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert!(stored.resolved_at.is_some());
        assert!(!store
            .transition(RequestId(999), RequestStatus::Rejected)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn resolved_pair_can_be_proposed_again() {
        let store = store_with(&[]).await;
        let first = store.insert_pending(AccountId(1), AccountId(2)).await.unwrap();
        store
            .transition(first.id, RequestStatus::Rejected)
            .await
            .unwrap();
        let second = store.insert_pending(AccountId(2), AccountId(1)).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(store
            .find_pending_between(AccountId(1), AccountId(2))
            .await
            .unwrap()
            .is_some());
    }
}
