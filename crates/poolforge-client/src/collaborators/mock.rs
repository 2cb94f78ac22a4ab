//! Mock ledger and wallet
//!
//! For testing purposes. Both can be told to fail a number of times before
//! behaving, which is how retry paths are exercised.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Ledger, Wallet};
use crate::error::{ClientError, Result};
use crate::types::{InclusionStatus, ResourceRequest};

/// Decrement `counter` if positive; true when a failure should be injected
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Ledger that knows a fixed set of deployed resources and includes every
/// transaction after a number of pending polls
#[derive(Debug, Default)]
pub struct MockLedger {
    deployed: Mutex<HashSet<String>>,
    failures: AtomicUsize,
    pending_polls: AtomicUsize,
    rejection: Mutex<Option<String>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a resource as already on the ledger
    pub fn with_deployed(self, request: &ResourceRequest) -> Self {
        self.deployed.lock().unwrap().insert(resource_key(request));
        self
    }

    /// Fail the next `n` calls with a ledger error
    pub fn failing(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Report `n` pending polls before inclusion
    pub fn pending_for(self, n: usize) -> Self {
        self.pending_polls.store(n, Ordering::SeqCst);
        self
    }

    /// Reject every submitted transaction
    pub fn rejecting(self, reason: impl Into<String>) -> Self {
        *self.rejection.lock().unwrap() = Some(reason.into());
        self
    }
}

fn resource_key(request: &ResourceRequest) -> String {
    format!("{}/{:?}", request.network, request.params)
}

#[async_trait]
impl Ledger for MockLedger {
    async fn resource_exists(&self, request: &ResourceRequest) -> Result<bool> {
        if take_failure(&self.failures) {
            return Err(ClientError::Ledger("ledger unavailable".into()));
        }
        Ok(self.deployed.lock().unwrap().contains(&resource_key(request)))
    }

    async fn inclusion_status(&self, _transaction_hash: &str) -> Result<InclusionStatus> {
        if take_failure(&self.failures) {
            return Err(ClientError::Ledger("ledger unavailable".into()));
        }
        if let Some(reason) = self.rejection.lock().unwrap().clone() {
            return Ok(InclusionStatus::Rejected { reason });
        }
        if take_failure(&self.pending_polls) {
            return Ok(InclusionStatus::Pending);
        }
        Ok(InclusionStatus::Included)
    }
}

/// Wallet that returns counter-based transaction hashes and records every
/// payload it was given
#[derive(Debug, Default)]
pub struct MockWallet {
    failures: AtomicUsize,
    signed: Mutex<Vec<String>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` signing requests
    pub fn failing(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Payloads signed so far
    pub fn signed(&self) -> Vec<String> {
        self.signed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn sign_and_send(&self, transaction_payload: &str) -> Result<String> {
        if take_failure(&self.failures) {
            return Err(ClientError::Wallet("user rejected the request".into()));
        }
        let mut signed = self.signed.lock().unwrap();
        signed.push(transaction_payload.to_string());
        Ok(format!("tx-{}", signed.len()))
    }
}
