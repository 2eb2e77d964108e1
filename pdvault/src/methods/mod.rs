//! Pipeline engine driving the account methods.
//!
//! Each method is an ordered chain of [`Step`]s over a shared mutable
//! [`CallContext`]: a step reads what it needs, leaves derived values for
//! the steps after it, and may place data on the [`MethodResult`]. The
//! first failing step terminates the chain; side effects already committed
//! by earlier steps are not rolled back.
//!
//! Handlers populate the context from the authenticated credential and the
//! request body, then hand it to [`Method::invoke`].

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument, trace};
use utoipa::ToSchema;

use crate::api::models::account::AccountDetails;
use crate::errors::{Error, Result};
use crate::storage::{Account, AccountPatch};

pub mod account;

pub use account::AccountMethods;

/// Mutable per-call state threaded through a method's steps.
#[derive(Debug, Default)]
pub struct CallContext {
    /// Resolved target account
    pub account: Option<Account>,
    /// Target username, for the operations that carry one in the body
    pub username: Option<String>,
    /// Caller's application identifier
    pub app_id: Option<String>,
    /// Caller's `Origin` (or `Referer`) header value
    pub origin: Option<String>,
    /// Current password, awaiting verification
    pub old_password: Option<String>,
    /// Replacement password, awaiting encryption
    pub new_password: Option<String>,
    /// Reset token supplied by the caller
    pub reset_token: Option<String>,
    /// Reset token issued during this call
    pub issued_reset_token: Option<String>,
    /// Update document accumulated for the account mutator
    pub update: AccountPatch,
}

impl CallContext {
    /// The resolved account. Steps that need one run after a resolving
    /// step, so absence is an internal consistency fault, not client error.
    pub fn account(&self) -> Result<&Account> {
        self.account
            .as_ref()
            .ok_or_else(|| Error::assertion("account is not resolved on the call context"))
    }

    pub fn username(&self) -> Result<&str> {
        self.username
            .as_deref()
            .ok_or_else(|| Error::assertion("username is missing from the call context"))
    }

    pub fn reset_token(&self) -> Result<&str> {
        self.reset_token
            .as_deref()
            .ok_or_else(|| Error::assertion("reset token is missing from the call context"))
    }

    pub fn issued_reset_token(&self) -> Result<&str> {
        self.issued_reset_token
            .as_deref()
            .ok_or_else(|| Error::assertion("no reset token was issued during this call"))
    }
}

/// Result object accumulated by a method's steps.
///
/// Carries at most the sanitized account; operations that must not echo the
/// account strip it as their last step.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct MethodResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountDetails>,
}

/// One unit of work within a method chain.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable step name for tracing
    fn name(&self) -> &'static str;

    async fn run(&self, call: &mut CallContext, result: &mut MethodResult) -> Result<()>;
}

/// A named, ordered chain of steps.
pub struct Method {
    name: &'static str,
    steps: Vec<Box<dyn Step>>,
}

impl Method {
    pub fn new(name: &'static str, steps: Vec<Box<dyn Step>>) -> Self {
        Self { name, steps }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Drive the steps in order, stopping at the first failure.
    #[instrument(skip_all, fields(method = self.name))]
    pub async fn invoke(&self, mut call: CallContext) -> Result<MethodResult> {
        let mut result = MethodResult::default();
        for step in &self.steps {
            trace!(step = step.name(), "Running step");
            if let Err(e) = step.run(&mut call, &mut result).await {
                debug!(step = step.name(), "Step failed: {e}");
                return Err(e);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingStep {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Step for RecordingStep {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, _call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
            self.log.lock().unwrap().push(self.name);
            Ok(())
        }
    }

    struct FailingStep {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Step for FailingStep {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, _call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
            self.log.lock().unwrap().push("failing");
            Err(Error::invalid_operation("boom", None))
        }
    }

    #[tokio::test]
    async fn steps_run_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let method = Method::new(
            "test.ordered",
            vec![
                Box::new(RecordingStep { name: "first", log: log.clone() }),
                Box::new(RecordingStep { name: "second", log: log.clone() }),
                Box::new(RecordingStep { name: "third", log: log.clone() }),
            ],
        );

        method.invoke(CallContext::default()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn first_failure_short_circuits_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let method = Method::new(
            "test.failing",
            vec![
                Box::new(RecordingStep { name: "first", log: log.clone() }),
                Box::new(FailingStep { log: log.clone() }),
                Box::new(RecordingStep { name: "never", log: log.clone() }),
            ],
        );

        let err = method.invoke(CallContext::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
        assert_eq!(*log.lock().unwrap(), vec!["first", "failing"]);
    }

    #[tokio::test]
    async fn missing_context_fields_are_assertion_faults() {
        let call = CallContext::default();
        assert!(matches!(call.account().unwrap_err(), Error::Assertion { .. }));
        assert!(matches!(call.username().unwrap_err(), Error::Assertion { .. }));
        assert!(matches!(call.reset_token().unwrap_err(), Error::Assertion { .. }));
        assert!(matches!(
            call.issued_reset_token().unwrap_err(),
            Error::Assertion { .. }
        ));
    }

    #[test]
    fn empty_result_serializes_without_account() {
        let result = MethodResult::default();
        assert_eq!(serde_json::to_string(&result).unwrap(), "{}");
    }
}
