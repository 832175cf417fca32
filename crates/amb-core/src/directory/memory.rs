use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    directory::{AdminDirectory, ContactRequestStore, ReportStore, UserDirectory},
    domain::{
        Account, AccountId, AnonymousId, ContactRequest, Handle, NewReport, Report, RequestId,
        RequestStatus,
    },
    errors::Error,
    Result,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<Handle, Account>,
    admins: BTreeMap<Handle, bool>,
    requests: Vec<ContactRequest>,
    reports: Vec<Report>,
}

/// In-process store with the same uniqueness rules as the SQLite schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Persistence("memory store poisoned".to_string()))
    }

    pub fn reports(&self) -> Vec<Report> {
        self.tables
            .lock()
            .map(|t| t.reports.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_handle(&self, handle: &Handle) -> Result<Option<Account>> {
        Ok(self.lock()?.users.get(handle).cloned())
    }

    async fn find_by_anonymous_id(&self, id: AnonymousId) -> Result<Option<Account>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|a| a.anonymous_id == Some(id))
            .cloned())
    }

    async fn find_by_account_id(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|a| a.account_id == Some(id))
            .cloned())
    }

    async fn upsert(&self, handle: &Handle, account_id: Option<AccountId>) -> Result<Account> {
        let mut t = self.lock()?;
        if let Some(id) = account_id {
            if t.users
                .values()
                .any(|a| a.account_id == Some(id) && &a.handle != handle)
            {
                return Err(Error::Conflict(format!("account id {} already registered", id.0)));
            }
        }
        let account = t.users.entry(handle.clone()).or_insert_with(|| Account {
            handle: handle.clone(),
            account_id: None,
            anonymous_id: None,
            created_at: Utc::now(),
        });
        match (account.account_id, account_id) {
            (Some(bound), Some(id)) if bound != id => {
                return Err(Error::Conflict(format!("@{handle} is bound to another account")));
            }
            (None, Some(id)) => account.account_id = Some(id),
            _ => {}
        }
        Ok(account.clone())
    }

    async fn rename(&self, account_id: AccountId, handle: &Handle) -> Result<Account> {
        let mut t = self.lock()?;
        let old = t
            .users
            .values()
            .find(|a| a.account_id == Some(account_id))
            .map(|a| a.handle.clone())
            .ok_or_else(|| Error::NotFound(format!("account {}", account_id.0)))?;
        if &old == handle {
            return t
                .users
                .get(handle)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("user @{handle}")));
        }
        if t.users.contains_key(handle) {
            return Err(Error::Conflict(format!("@{handle} already exists")));
        }
        let mut account = t
            .users
            .remove(&old)
            .ok_or_else(|| Error::NotFound(format!("user @{old}")))?;
        account.handle = handle.clone();
        t.users.insert(handle.clone(), account.clone());
        if let Some(is_super) = t.admins.remove(&old) {
            t.admins.insert(handle.clone(), is_super);
        }
        Ok(account)
    }

    async fn set_anonymous_id(&self, handle: &Handle, id: Option<AnonymousId>) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(id) = id {
            if t.users
                .values()
                .any(|a| a.anonymous_id == Some(id) && &a.handle != handle)
            {
                return Err(Error::Conflict(format!("{id} already assigned")));
            }
        }
        let account = t
            .users
            .get_mut(handle)
            .ok_or_else(|| Error::NotFound(format!("user @{handle}")))?;
        account.anonymous_id = id;
        Ok(())
    }

    async fn clear_anonymous_ids(&self) -> Result<u64> {
        let mut t = self.lock()?;
        let mut touched = 0;
        for account in t.users.values_mut() {
            account.anonymous_id = None;
            touched += 1;
        }
        Ok(touched)
    }

    async fn list_all(&self) -> Result<Vec<Account>> {
        Ok(self.lock()?.users.values().cloned().collect())
    }

    async fn assigned_anonymous_ids(&self) -> Result<Vec<AnonymousId>> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter_map(|a| a.anonymous_id)
            .collect())
    }
}

#[async_trait]
impl AdminDirectory for MemoryStore {
    async fn is_admin(&self, handle: &Handle) -> Result<bool> {
        Ok(self.lock()?.admins.contains_key(handle))
    }

    async fn is_super_admin(&self, handle: &Handle) -> Result<bool> {
        Ok(self.lock()?.admins.get(handle).copied().unwrap_or(false))
    }

    async fn grant_admin(&self, handle: &Handle, super_admin: bool) -> Result<bool> {
        let mut t = self.lock()?;
        if !t.users.contains_key(handle) {
            return Err(Error::NotFound(format!("user @{handle}")));
        }
        if t.admins.contains_key(handle) {
            return Ok(false);
        }
        t.admins.insert(handle.clone(), super_admin);
        Ok(true)
    }

    async fn revoke_admin(&self, handle: &Handle) -> Result<bool> {
        let mut t = self.lock()?;
        match t.admins.get(handle) {
            Some(false) => {
                t.admins.remove(handle);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn admin_account_ids(&self) -> Result<Vec<AccountId>> {
        let t = self.lock()?;
        Ok(t.admins
            .keys()
            .filter_map(|h| t.users.get(h).and_then(|a| a.account_id))
            .collect())
    }
}

#[async_trait]
impl ContactRequestStore for MemoryStore {
    async fn insert_pending(&self, from: AccountId, to: AccountId) -> Result<ContactRequest> {
        let mut t = self.lock()?;
        if t.requests
            .iter()
            .any(|r| r.status == RequestStatus::Pending && r.links(from, to))
        {
            return Err(Error::DuplicatePending);
        }
        let request = ContactRequest {
            id: RequestId(t.requests.len() as i64 + 1),
            from_account_id: from,
            to_account_id: to,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };
        t.requests.push(request.clone());
        Ok(request)
    }

    async fn find_request(&self, id: RequestId) -> Result<Option<ContactRequest>> {
        Ok(self.lock()?.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn find_pending_between(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<Option<ContactRequest>> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .find(|r| r.status == RequestStatus::Pending && r.links(a, b))
            .cloned())
    }

    async fn transition(&self, id: RequestId, status: RequestStatus) -> Result<bool> {
        let mut t = self.lock()?;
        let Some(request) = t.requests.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if request.status != RequestStatus::Pending {
            return Ok(false);
        }
        request.status = status;
        request.resolved_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn insert_report(&self, report: NewReport) -> Result<Report> {
        let mut t = self.lock()?;
        let report = Report {
            id: t.reports.len() as i64 + 1,
            reporter_account_id: report.reporter_account_id,
            reported_account_id: report.reported_account_id,
            reported_handle: report.reported_handle,
            reason: report.reason,
            created_at: Utc::now(),
        };
        t.reports.push(report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_records_late_account_id() {
        let store = MemoryStore::new();
        let first = store.upsert(&h("alice"), None).await.unwrap();
        assert_eq!(first.account_id, None);

        let second = store.upsert(&h("alice"), Some(AccountId(7))).await.unwrap();
        assert_eq!(second.account_id, Some(AccountId(7)));
        assert_eq!(second.created_at, first.created_at);

        let third = store.upsert(&h("alice"), None).await.unwrap();
        assert_eq!(third.account_id, Some(AccountId(7)));
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bound_account_id_is_never_rebound() {
        let store = MemoryStore::new();
        store.upsert(&h("alice"), Some(AccountId(10))).await.unwrap();
        store
            .set_anonymous_id(&h("alice"), Some(AnonymousId::new(5).unwrap()))
            .await
            .unwrap();

        assert!(matches!(
            store.upsert(&h("alice"), Some(AccountId(20))).await,
            Err(Error::Conflict(_))
        ));
        let alice = store.find_by_account_id(AccountId(10)).await.unwrap().unwrap();
        assert_eq!(alice.handle, h("alice"));
        assert!(store.find_by_account_id(AccountId(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rename_moves_number_and_admin_role() {
        let store = MemoryStore::new();
        store.upsert(&h("alice"), Some(AccountId(10))).await.unwrap();
        let five = AnonymousId::new(5).unwrap();
        store.set_anonymous_id(&h("alice"), Some(five)).await.unwrap();
        store.grant_admin(&h("alice"), false).await.unwrap();
        store.upsert(&h("taken"), None).await.unwrap();

        assert!(matches!(
            store.rename(AccountId(10), &h("taken")).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.rename(AccountId(99), &h("nobody")).await,
            Err(Error::NotFound(_))
        ));

        let moved = store.rename(AccountId(10), &h("alice_new")).await.unwrap();
        assert_eq!(moved.anonymous_id, Some(five));
        assert!(store.find_by_handle(&h("alice")).await.unwrap().is_none());
        assert!(store.is_admin(&h("alice_new")).await.unwrap());
        assert!(!store.is_admin(&h("alice")).await.unwrap());
    }

    #[tokio::test]
    async fn anonymous_id_is_unique_across_accounts() {
        let store = MemoryStore::new();
        store.upsert(&h("alice"), Some(AccountId(1))).await.unwrap();
        store.upsert(&h("bob"), Some(AccountId(2))).await.unwrap();
        let id = AnonymousId::new(3).unwrap();

        store.set_anonymous_id(&h("alice"), Some(id)).await.unwrap();
        let err = store.set_anonymous_id(&h("bob"), Some(id)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Re-writing the same value on the holder is fine.
        store.set_anonymous_id(&h("alice"), Some(id)).await.unwrap();
    }

    #[tokio::test]
    async fn revoke_never_strips_super_admin() {
        let store = MemoryStore::new();
        store.upsert(&h("root"), None).await.unwrap();
        store.upsert(&h("mod"), None).await.unwrap();
        store.grant_admin(&h("root"), true).await.unwrap();
        store.grant_admin(&h("mod"), false).await.unwrap();

        assert!(!store.revoke_admin(&h("root")).await.unwrap());
        assert!(store.revoke_admin(&h("mod")).await.unwrap());
        assert!(!store.revoke_admin(&h("mod")).await.unwrap());
        assert!(store.is_super_admin(&h("root")).await.unwrap());
    }

    #[tokio::test]
    async fn transition_only_moves_pending_requests() {
        let store = MemoryStore::new();
        let req = store
            .insert_pending(AccountId(1), AccountId(2))
            .await
            .unwrap();
        assert!(store
            .transition(req.id, RequestStatus::Accepted)
            .await
            .unwrap());
        assert!(!store
            .transition(req.id, RequestStatus::Rejected)
            .await
            .unwrap());
        let stored = store.find_request(req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
    }
}
