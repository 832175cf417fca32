//! Admin roles and participant reports.

use std::sync::Arc;

use crate::{
    directory::{AdminDirectory, ReportStore, UserDirectory},
    domain::{AccountId, Handle, NewReport, Report, Role},
    errors::Error,
    notifier::{Notification, Notifier},
    Result,
};

/// Proof that `handle` held an admin role when the grant was issued.
///
/// Only [`Moderation`] can mint one; privileged operations take it by
/// reference instead of re-checking roles themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminGrant {
    handle: Handle,
    role: Role,
}

impl AdminGrant {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

pub struct Moderation {
    users: Arc<dyn UserDirectory>,
    admins: Arc<dyn AdminDirectory>,
    reports: Arc<dyn ReportStore>,
    notifier: Arc<dyn Notifier>,
}

impl Moderation {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        admins: Arc<dyn AdminDirectory>,
        reports: Arc<dyn ReportStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            users,
            admins,
            reports,
            notifier,
        }
    }

    pub async fn role_of(&self, handle: &Handle) -> Result<Role> {
        if self.admins.is_super_admin(handle).await? {
            return Ok(Role::SuperAdmin);
        }
        if self.admins.is_admin(handle).await? {
            return Ok(Role::Admin);
        }
        Ok(Role::Participant)
    }

    pub async fn require_admin(&self, handle: &Handle) -> Result<AdminGrant> {
        let role = self.role_of(handle).await?;
        if !role.is_admin() {
            return Err(Error::Forbidden("admin only".to_string()));
        }
        Ok(AdminGrant {
            handle: handle.clone(),
            role,
        })
    }

    pub async fn require_super_admin(&self, handle: &Handle) -> Result<AdminGrant> {
        let role = self.role_of(handle).await?;
        if role != Role::SuperAdmin {
            return Err(Error::Forbidden("super admin only".to_string()));
        }
        Ok(AdminGrant {
            handle: handle.clone(),
            role,
        })
    }

    /// Make sure the configured super admin exists. Idempotent.
    pub async fn bootstrap(&self, super_admin: &Handle) -> Result<()> {
        self.users.upsert(super_admin, None).await?;
        if self.admins.grant_admin(super_admin, true).await? {
            tracing::info!(handle = %super_admin, "super admin bootstrapped");
        }
        Ok(())
    }

    /// Promote `handle` to admin, creating the account if it never started
    /// the bot. Returns `false` when it already was an admin.
    pub async fn add_admin(&self, grant: &AdminGrant, handle: &Handle) -> Result<bool> {
        if !grant.is_super_admin() {
            return Err(Error::Forbidden("super admin only".to_string()));
        }
        self.users.upsert(handle, None).await?;
        let added = self.admins.grant_admin(handle, false).await?;
        if added {
            tracing::info!(by = %grant.handle, handle = %handle, "admin added");
        }
        Ok(added)
    }

    /// Demote an ordinary admin. Returns `false` when `handle` is not an
    /// admin or is a super admin.
    pub async fn remove_admin(&self, grant: &AdminGrant, handle: &Handle) -> Result<bool> {
        if !grant.is_super_admin() {
            return Err(Error::Forbidden("super admin only".to_string()));
        }
        let removed = self.admins.revoke_admin(handle).await?;
        if removed {
            tracing::info!(by = %grant.handle, handle = %handle, "admin removed");
        }
        Ok(removed)
    }

    /// Record a report against `reported` and alert every reachable admin.
    pub async fn report(
        &self,
        reporter: AccountId,
        reported: &Handle,
        reason: &str,
    ) -> Result<Report> {
        let target = self
            .users
            .find_by_handle(reported)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user @{reported}")))?;
        let reporter_account = self.users.find_by_account_id(reporter).await?;

        let report = self
            .reports
            .insert_report(NewReport {
                reporter_account_id: reporter,
                reported_account_id: target.account_id,
                reported_handle: target.handle.clone(),
                reason: reason.trim().to_string(),
            })
            .await?;
        tracing::info!(report_id = report.id, reporter = reporter.0, reported = %reported, "report filed");

        let alert = Notification::ReportFiled {
            reported: target.handle,
            reported_anonymous: target.anonymous_id,
            reporter: reporter_account.map(|a| a.handle),
            reason: report.reason.clone(),
        };
        for admin in self.admins.admin_account_ids().await? {
            self.notifier.notify(admin, alert.clone()).await;
        }
        Ok(report)
    }
}
