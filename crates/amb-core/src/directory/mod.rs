//! Persistence ports for accounts, admin roles, contact requests and reports.
//!
//! `amb-store` implements these over SQLite; [`memory::MemoryStore`] is the
//! in-process implementation used by tests.

use async_trait::async_trait;

use crate::{
    domain::{
        Account, AccountId, AnonymousId, ContactRequest, Handle, NewReport, Report, RequestId,
        RequestStatus,
    },
    Result,
};

pub mod memory;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_handle(&self, handle: &Handle) -> Result<Option<Account>>;
    async fn find_by_anonymous_id(&self, id: AnonymousId) -> Result<Option<Account>>;
    async fn find_by_account_id(&self, id: AccountId) -> Result<Option<Account>>;

    /// Idempotent insert keyed by handle. A supplied account id only fills an
    /// unbound row; `None` never clears one.
    ///
    /// Fails with `Conflict` when the handle is bound to a different account
    /// id, or when the account id is already bound to another handle.
    async fn upsert(&self, handle: &Handle, account_id: Option<AccountId>) -> Result<Account>;

    /// Move the row bound to `account_id` to `handle`, keeping its anonymous
    /// number and admin role.
    ///
    /// Fails with `NotFound` when no row is bound to `account_id` and with
    /// `Conflict` when `handle` is already taken.
    async fn rename(&self, account_id: AccountId, handle: &Handle) -> Result<Account>;

    /// Overwrite (or clear) the anonymous number of one account.
    ///
    /// Fails with `Conflict` when another account already holds `id` and with
    /// `NotFound` when the handle is unknown.
    async fn set_anonymous_id(&self, handle: &Handle, id: Option<AnonymousId>) -> Result<()>;

    /// Clear every anonymous number. Returns the number of rows touched.
    async fn clear_anonymous_ids(&self) -> Result<u64>;

    async fn list_all(&self) -> Result<Vec<Account>>;

    async fn assigned_anonymous_ids(&self) -> Result<Vec<AnonymousId>>;
}

#[async_trait]
pub trait AdminDirectory: Send + Sync {
    async fn is_admin(&self, handle: &Handle) -> Result<bool>;
    async fn is_super_admin(&self, handle: &Handle) -> Result<bool>;

    /// Returns `false` when the handle already held an admin role.
    /// The account must exist.
    async fn grant_admin(&self, handle: &Handle, super_admin: bool) -> Result<bool>;

    /// Removes an ordinary admin role. Super admins are never removed here.
    async fn revoke_admin(&self, handle: &Handle) -> Result<bool>;

    /// Account ids of every admin that has started the bot.
    async fn admin_account_ids(&self) -> Result<Vec<AccountId>>;
}

#[async_trait]
pub trait ContactRequestStore: Send + Sync {
    /// Persist a new pending request.
    ///
    /// Fails with `DuplicatePending` if a pending row already links the pair.
    async fn insert_pending(&self, from: AccountId, to: AccountId) -> Result<ContactRequest>;

    async fn find_request(&self, id: RequestId) -> Result<Option<ContactRequest>>;

    /// Pending request linking `a` and `b` in either direction.
    async fn find_pending_between(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<Option<ContactRequest>>;

    /// Move a pending request to `status`. Returns `false` (and writes
    /// nothing) when the request is not pending anymore.
    async fn transition(&self, id: RequestId, status: RequestStatus) -> Result<bool>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert_report(&self, report: NewReport) -> Result<Report>;
}

/// Convenience bound for a single backend that serves every port.
pub trait Store: UserDirectory + AdminDirectory + ContactRequestStore + ReportStore {}

impl<T> Store for T where T: UserDirectory + AdminDirectory + ContactRequestStore + ReportStore {}
