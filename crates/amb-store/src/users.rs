use async_trait::async_trait;
use chrono::{DateTime, Utc};

use amb_core::{
    directory::UserDirectory,
    domain::{Account, AccountId, AnonymousId, Handle},
    Error, Result,
};

use crate::{db_err, SqliteStore};

type UserRow = (String, Option<i64>, Option<i64>, DateTime<Utc>);

const SELECT_USER: &str = "SELECT handle, account_id, anonymous_id, created_at FROM users";

fn anonymous_from_db(raw: i64) -> Result<AnonymousId> {
    u16::try_from(raw)
        .map_err(|_| Error::Persistence(format!("anonymous id out of range: {raw}")))
        .and_then(AnonymousId::new)
}

fn account_from_row((handle, account_id, anonymous_id, created_at): UserRow) -> Result<Account> {
    Ok(Account {
        handle: Handle::parse(&handle)
            .map_err(|e| Error::Persistence(format!("stored handle {handle:?}: {e}")))?,
        account_id: account_id.map(AccountId),
        anonymous_id: anonymous_id.map(anonymous_from_db).transpose()?,
        created_at,
    })
}

impl SqliteStore {
    async fn fetch_user(&self, clause: &str, bind: i64) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE {clause} = ?"))
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(account_from_row).transpose()
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find_by_handle(&self, handle: &Handle) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE handle = ?"))
            .bind(handle.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(account_from_row).transpose()
    }

    async fn find_by_anonymous_id(&self, id: AnonymousId) -> Result<Option<Account>> {
        self.fetch_user("anonymous_id", i64::from(id.value())).await
    }

    async fn find_by_account_id(&self, id: AccountId) -> Result<Option<Account>> {
        self.fetch_user("account_id", id.0).await
    }

    async fn upsert(&self, handle: &Handle, account_id: Option<AccountId>) -> Result<Account> {
        sqlx::query(
            "INSERT INTO users (handle, account_id, created_at) VALUES (?, ?, ?) \
             ON CONFLICT (handle) DO UPDATE \
             SET account_id = COALESCE(users.account_id, excluded.account_id)",
        )
        .bind(handle.as_str())
        .bind(account_id.map(|id| id.0))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let account = self
            .find_by_handle(handle)
            .await?
            .ok_or_else(|| Error::Persistence(format!("user @{handle} vanished after upsert")))?;
        match (account.account_id, account_id) {
            (Some(bound), Some(id)) if bound != id => Err(Error::Conflict(format!(
                "@{handle} is bound to another account"
            ))),
            _ => Ok(account),
        }
    }

    async fn rename(&self, account_id: AccountId, handle: &Handle) -> Result<Account> {
        // admins.handle follows through ON UPDATE CASCADE.
        let done = sqlx::query("UPDATE users SET handle = ? WHERE account_id = ?")
            .bind(handle.as_str())
            .bind(account_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("account {}", account_id.0)));
        }
        self.find_by_account_id(account_id).await?.ok_or_else(|| {
            Error::Persistence(format!("account {} vanished after rename", account_id.0))
        })
    }

    async fn set_anonymous_id(&self, handle: &Handle, id: Option<AnonymousId>) -> Result<()> {
        let done = sqlx::query("UPDATE users SET anonymous_id = ? WHERE handle = ?")
            .bind(id.map(|id| i64::from(id.value())))
            .bind(handle.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user @{handle}")));
        }
        Ok(())
    }

    async fn clear_anonymous_ids(&self) -> Result<u64> {
        let done = sqlx::query("UPDATE users SET anonymous_id = NULL")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(done.rows_affected())
    }

    async fn list_all(&self) -> Result<Vec<Account>> {
        let sql = format!("{SELECT_USER} ORDER BY created_at, handle");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(account_from_row).collect()
    }

    async fn assigned_anonymous_ids(&self) -> Result<Vec<AnonymousId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT anonymous_id FROM users WHERE anonymous_id IS NOT NULL ORDER BY anonymous_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        ids.into_iter().map(anonymous_from_db).collect()
    }
}

#[cfg(test)]
mod tests {
    use amb_core::directory::AdminDirectory;

    use super::*;
    use crate::test_support::{h, store_with};

    #[tokio::test]
    async fn upsert_keeps_existing_account_id() {
        let store = store_with(&[("alice", 10)]).await;
        let again = store.upsert(&h("alice"), None).await.unwrap();
        assert_eq!(again.account_id, Some(AccountId(10)));

        let created = store.upsert(&h("bob"), None).await.unwrap();
        assert_eq!(created.account_id, None);
        let bound = store.upsert(&h("bob"), Some(AccountId(11))).await.unwrap();
        assert_eq!(bound.account_id, Some(AccountId(11)));
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn account_id_is_unique() {
        let store = store_with(&[("alice", 10)]).await;
        assert!(matches!(
            store.upsert(&h("alias"), Some(AccountId(10))).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn bound_account_id_is_never_rebound() {
        let store = store_with(&[("alice", 10)]).await;
        let five = AnonymousId::new(5).unwrap();
        store.set_anonymous_id(&h("alice"), Some(five)).await.unwrap();

        assert!(matches!(
            store.upsert(&h("alice"), Some(AccountId(20))).await,
            Err(Error::Conflict(_))
        ));
        let alice = store.find_by_account_id(AccountId(10)).await.unwrap().unwrap();
        assert_eq!(alice.handle, h("alice"));
        assert_eq!(alice.anonymous_id, Some(five));
        assert!(store.find_by_account_id(AccountId(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rename_keeps_number_and_admin_role() {
        let store = store_with(&[("alice", 10), ("taken", 11)]).await;
        let five = AnonymousId::new(5).unwrap();
        store.set_anonymous_id(&h("alice"), Some(five)).await.unwrap();
        store.grant_admin(&h("alice"), false).await.unwrap();

        assert!(matches!(
            store.rename(AccountId(10), &h("taken")).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.rename(AccountId(99), &h("nobody")).await,
            Err(Error::NotFound(_))
        ));

        let moved = store.rename(AccountId(10), &h("alice_new")).await.unwrap();
        assert_eq!(moved.handle, h("alice_new"));
        assert_eq!(moved.anonymous_id, Some(five));
        assert!(store.find_by_handle(&h("alice")).await.unwrap().is_none());
        assert!(store.is_admin(&h("alice_new")).await.unwrap());
        assert!(!store.is_admin(&h("alice")).await.unwrap());
    }

    #[tokio::test]
    async fn anonymous_ids_are_unique_and_searchable() {
        let store = store_with(&[("alice", 1), ("bob", 2)]).await;
        let seven = AnonymousId::new(7).unwrap();

        store.set_anonymous_id(&h("alice"), Some(seven)).await.unwrap();
        assert!(matches!(
            store.set_anonymous_id(&h("bob"), Some(seven)).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.set_anonymous_id(&h("ghost"), Some(seven)).await,
            Err(Error::NotFound(_))
        ));

        let found = store.find_by_anonymous_id(seven).await.unwrap().unwrap();
        assert_eq!(found.handle, h("alice"));
        assert_eq!(
            store.find_by_account_id(AccountId(2)).await.unwrap().unwrap().handle,
            h("bob")
        );
        assert_eq!(store.assigned_anonymous_ids().await.unwrap(), vec![seven]);

        assert_eq!(store.clear_anonymous_ids().await.unwrap(), 2);
        assert!(store.assigned_anonymous_ids().await.unwrap().is_empty());
    }
}
