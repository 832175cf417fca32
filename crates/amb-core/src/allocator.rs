//! Anonymous number allocation.
//!
//! The pool is `#000..=#500`. Two selection policies exist (uniform random over
//! the free numbers, or successor of the highest assigned number); the bot runs
//! with one of them, chosen by [`AllocationStrategy`].

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use tokio::sync::Mutex;

use crate::{
    directory::UserDirectory,
    domain::{AnonymousId, Handle},
    errors::Error,
    Result,
};

/// Attempts made by [`IdentityAllocator::assign_fresh`] when the store reports
/// that the chosen number was taken in the meantime.
const MAX_ASSIGN_ATTEMPTS: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Uniform pick among the free numbers.
    #[default]
    Random,
    /// Successor of the highest assigned number.
    Sequential,
}

impl FromStr for AllocationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(AllocationStrategy::Random),
            "sequential" | "next" => Ok(AllocationStrategy::Sequential),
            other => Err(Error::Config(format!(
                "unknown allocation strategy: {other} (expected random|sequential)"
            ))),
        }
    }
}

/// Outcome of [`IdentityAllocator::reset_all`], one entry per account.
#[derive(Debug, Default)]
pub struct ResetReport {
    pub assigned: Vec<(Handle, AnonymousId)>,
    pub failed: Vec<(Handle, Error)>,
}

impl ResetReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct IdentityAllocator {
    users: Arc<dyn UserDirectory>,
    strategy: AllocationStrategy,
    /// Serializes allocate-then-assign sequences within this process.
    assign_lock: Mutex<()>,
}

impl IdentityAllocator {
    pub fn new(users: Arc<dyn UserDirectory>, strategy: AllocationStrategy) -> Self {
        Self {
            users,
            strategy,
            assign_lock: Mutex::new(()),
        }
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    /// Pick a free number with the configured strategy. Does not persist.
    pub async fn allocate(&self) -> Result<AnonymousId> {
        match self.strategy {
            AllocationStrategy::Random => self.allocate_random().await,
            AllocationStrategy::Sequential => self.allocate_next().await,
        }
    }

    /// Uniformly random number among those no account currently holds.
    pub async fn allocate_random(&self) -> Result<AnonymousId> {
        let in_use: HashSet<AnonymousId> = self
            .users
            .assigned_anonymous_ids()
            .await?
            .into_iter()
            .collect();
        let free: Vec<AnonymousId> = AnonymousId::all()
            .filter(|id| !in_use.contains(id))
            .collect();
        free.choose(&mut rand::rng())
            .copied()
            .ok_or(Error::PoolExhausted)
    }

    /// Successor of the highest assigned number, `#000` on an empty pool.
    pub async fn allocate_next(&self) -> Result<AnonymousId> {
        let highest = self.users.assigned_anonymous_ids().await?.into_iter().max();
        match highest {
            None => AnonymousId::new(AnonymousId::MIN),
            Some(top) => top.next().ok_or(Error::PoolExhausted),
        }
    }

    /// Write `id` to the account, overwriting any previous number.
    pub async fn assign(&self, handle: &Handle, id: AnonymousId) -> Result<()> {
        self.users.set_anonymous_id(handle, Some(id)).await
    }

    /// Allocate and assign in one step.
    ///
    /// Allocation is serialized in-process, and a `Conflict` from the store's
    /// unique constraint (another writer won the number) triggers a fresh pick.
    pub async fn assign_fresh(&self, handle: &Handle) -> Result<AnonymousId> {
        let _guard = self.assign_lock.lock().await;
        self.assign_fresh_locked(handle).await
    }

    async fn assign_fresh_locked(&self, handle: &Handle) -> Result<AnonymousId> {
        let mut last_conflict = None;
        for attempt in 1..=MAX_ASSIGN_ATTEMPTS {
            let id = self.allocate().await?;
            match self.assign(handle, id).await {
                Ok(()) => return Ok(id),
                Err(Error::Conflict(msg)) => {
                    tracing::debug!(handle = %handle, %id, attempt, "anonymous number taken, retrying");
                    last_conflict = Some(msg);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(last_conflict.unwrap_or_else(|| {
            format!("no free number after {MAX_ASSIGN_ATTEMPTS} attempts")
        })))
    }

    /// Clear every number, then give each account a fresh one.
    ///
    /// Not transactional: each account is its own operation and failures are
    /// collected, leaving those accounts without a number.
    pub async fn reset_all(&self) -> Result<ResetReport> {
        let _guard = self.assign_lock.lock().await;

        let cleared = self.users.clear_anonymous_ids().await?;
        let accounts = self.users.list_all().await?;
        tracing::info!(cleared, accounts = accounts.len(), "reassigning all anonymous numbers");

        let mut report = ResetReport::default();
        for account in accounts {
            match self.assign_fresh_locked(&account.handle).await {
                Ok(id) => report.assigned.push((account.handle, id)),
                Err(e) => {
                    tracing::warn!(handle = %account.handle, error = %e, "number reassignment failed");
                    report.failed.push((account.handle, e));
                }
            }
        }
        Ok(report)
    }
}
