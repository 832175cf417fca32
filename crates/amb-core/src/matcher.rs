//! Contact request matching.
//!
//! A request moves `pending -> accepted | rejected` exactly once. Real handles
//! are revealed only on acceptance, to both sides.

use std::sync::Arc;

use crate::{
    directory::{ContactRequestStore, UserDirectory},
    domain::{
        Account, AccountId, AnonymousId, ContactRequest, Handle, RequestId, RequestStatus,
        TargetRef,
    },
    errors::Error,
    notifier::{Decision, Notification, Notifier},
    Result,
};

/// Both parties' real handles, produced when a request is accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disclosure {
    pub request_id: RequestId,
    pub requester: Handle,
    pub requester_account_id: AccountId,
    pub responder: Handle,
    pub responder_account_id: AccountId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Accepted(Disclosure),
    Rejected { request_id: RequestId },
}

/// A freshly created request plus what the requester may be told about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub request: ContactRequest,
    /// Anonymous number of the target, when one is assigned.
    pub target_anonymous: Option<AnonymousId>,
}

pub struct ContactMatcher {
    users: Arc<dyn UserDirectory>,
    requests: Arc<dyn ContactRequestStore>,
    notifier: Arc<dyn Notifier>,
}

impl ContactMatcher {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        requests: Arc<dyn ContactRequestStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            users,
            requests,
            notifier,
        }
    }

    async fn resolve_target(&self, target: &TargetRef) -> Result<Account> {
        let found = match target {
            TargetRef::Handle(handle) => self.users.find_by_handle(handle).await?,
            TargetRef::Anonymous(id) => self.users.find_by_anonymous_id(*id).await?,
        };
        found.ok_or_else(|| Error::NotFound(format!("participant {target}")))
    }

    /// Ask `target` for contact on behalf of `from`.
    ///
    /// The target only ever sees the requester's anonymous number.
    pub async fn propose(&self, from: AccountId, target: &TargetRef) -> Result<Proposal> {
        let requester = self.users.find_by_account_id(from).await?;
        let Some(from_anonymous) = requester.and_then(|a| a.anonymous_id) else {
            return Err(Error::NoIdentityAssigned);
        };

        let target_account = self.resolve_target(target).await?;
        // Accounts pre-created by an admin have no Telegram id until /start.
        let to = target_account.account_id.ok_or_else(|| {
            Error::NotFound(format!("participant {target} has not started the bot"))
        })?;

        if to == from {
            return Err(Error::SelfContact);
        }

        if self.requests.find_pending_between(from, to).await?.is_some() {
            return Err(Error::DuplicatePending);
        }
        let request = self.requests.insert_pending(from, to).await?;
        tracing::info!(
            request_id = request.id.0,
            from = from.0,
            to = to.0,
            "contact request created"
        );

        self.notifier
            .notify(
                to,
                Notification::ContactProposed {
                    request_id: request.id,
                    from_anonymous,
                },
            )
            .await;

        Ok(Proposal {
            request,
            target_anonymous: target_account.anonymous_id,
        })
    }

    /// Apply the addressee's decision to a pending request.
    pub async fn resolve(
        &self,
        request_id: RequestId,
        decision: Decision,
        responder: AccountId,
    ) -> Result<Resolution> {
        let request = self
            .requests
            .find_request(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("contact request {request_id}")))?;

        if request.to_account_id != responder {
            return Err(Error::NotRecipient);
        }
        if request.status.is_terminal() {
            return Err(Error::AlreadyResolved);
        }

        match decision {
            Decision::Accept => self.accept(request).await,
            Decision::Reject => self.reject(request).await,
        }
    }

    async fn accept(&self, request: ContactRequest) -> Result<Resolution> {
        // Resolve both handles before the terminal write so a missing account
        // leaves the request pending.
        let requester = self.account_for(request.from_account_id).await?;
        let responder = self.account_for(request.to_account_id).await?;

        if !self
            .requests
            .transition(request.id, RequestStatus::Accepted)
            .await?
        {
            return Err(Error::AlreadyResolved);
        }
        tracing::info!(request_id = request.id.0, "contact request accepted");

        let disclosure = Disclosure {
            request_id: request.id,
            requester: requester.handle,
            requester_account_id: request.from_account_id,
            responder: responder.handle,
            responder_account_id: request.to_account_id,
        };

        self.notifier
            .notify(
                disclosure.requester_account_id,
                Notification::ContactAccepted {
                    counterpart: disclosure.responder.clone(),
                },
            )
            .await;
        self.notifier
            .notify(
                disclosure.responder_account_id,
                Notification::ContactAccepted {
                    counterpart: disclosure.requester.clone(),
                },
            )
            .await;

        Ok(Resolution::Accepted(disclosure))
    }

    async fn reject(&self, request: ContactRequest) -> Result<Resolution> {
        if !self
            .requests
            .transition(request.id, RequestStatus::Rejected)
            .await?
        {
            return Err(Error::AlreadyResolved);
        }
        tracing::info!(request_id = request.id.0, "contact request rejected");

        self.notifier
            .notify(request.from_account_id, Notification::ContactRejected)
            .await;

        Ok(Resolution::Rejected {
            request_id: request.id,
        })
    }

    async fn account_for(&self, id: AccountId) -> Result<Account> {
        self.users
            .find_by_account_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {}", id.0)))
    }
}
