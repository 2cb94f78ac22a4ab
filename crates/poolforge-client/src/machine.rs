//! Deployment orchestrator state machine
//!
//! `transition` is a pure function from a machine and an event to the next
//! machine and the effects the driver must run. Each effect's outcome comes
//! back as the next event.
//!
//! ```text
//! INIT ─(no job id)→ CHECKING_EXISTS ─→ CREATING ─→ WAITING_FOR_PROOF ─→ SIGNING ─→ CONFIRMING ─→ COMPLETED
//!  │                       └─(exists)→ POOL_ALREADY_EXISTS
//!  └─(job id known)→ GET_STATUS ─(completed)→ SIGNING
//!                              ├─(waiting/active)→ WAITING_FOR_PROOF
//!                              ├─(failed)→ CREATING (same id)
//!                              └─(unknown)→ CHECKING_EXISTS
//! any failure → RETRY ─(delay)→ INIT, or FAILED once the retry budget is spent
//! ```

use poolforge_core::{CreateStatus, JobSnapshot, JobStatus};
use std::fmt;
use std::time::Duration;

/// Default pause before a retry re-enters `INIT`
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default number of retries before giving up
pub const DEFAULT_MAX_RETRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    CheckingExists,
    Creating,
    GetStatus,
    WaitingForProof,
    Signing,
    Confirming,
    Retry,
    Completed,
    PoolAlreadyExists,
    Failed,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Init => "INIT",
            State::CheckingExists => "CHECKING_EXISTS",
            State::Creating => "CREATING",
            State::GetStatus => "GET_STATUS",
            State::WaitingForProof => "WAITING_FOR_PROOF",
            State::Signing => "SIGNING",
            State::Confirming => "CONFIRMING",
            State::Retry => "RETRY",
            State::Completed => "COMPLETED",
            State::PoolAlreadyExists => "POOL_ALREADY_EXISTS",
            State::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Completed | State::PoolAlreadyExists | State::Failed
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    ExistenceChecked { exists: bool },
    JobCreated { id: String, status: CreateStatus },
    StatusReceived(JobSnapshot),
    JobNotFound,
    ProofReady { resource_public_key: String, transaction_payload: String },
    JobFailed { reason: String },
    /// No subscription event arrived in time
    SubscriptionTimedOut,
    TransactionIncluded { hash: String },
    Confirmed { message: String },
    /// A collaborator call failed
    ActorFailed { error: String },
    RetryElapsed,
}

/// Work the driver performs on the machine's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CheckExists,
    /// Create a job, reusing `job_id` when re-enqueuing
    CreateJob { job_id: Option<String> },
    PersistJobId(String),
    ClearJobId,
    FetchStatus { job_id: String },
    Subscribe { job_id: String },
    /// Have the wallet sign the payload and wait for ledger inclusion
    Sign { transaction_payload: String },
    Confirm { job_id: String },
    Sleep(Duration),
}

/// Orchestrator state plus everything gathered along the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub state: State,
    pub job_id: Option<String>,
    pub resource_public_key: Option<String>,
    pub transaction_payload: Option<String>,
    pub transaction_hash: Option<String>,
    pub message: Option<String>,
    /// Every failure seen, in order
    pub errors: Vec<String>,
    pub retries: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl Machine {
    /// Fresh machine, resuming from a persisted job id when there is one
    pub fn new(job_id: Option<String>, max_retries: usize, retry_delay: Duration) -> Self {
        Self {
            state: State::Init,
            job_id,
            resource_public_key: None,
            transaction_payload: None,
            transaction_hash: None,
            message: None,
            errors: Vec::new(),
            retries: 0,
            max_retries,
            retry_delay,
        }
    }

    fn enter(&mut self, state: State) {
        self.state = state;
    }

    /// INIT: resume from a known job or start from the ledger check
    fn start(mut self) -> (Self, Vec<Effect>) {
        match self.job_id.clone() {
            Some(job_id) => {
                self.enter(State::GetStatus);
                (self, vec![Effect::FetchStatus { job_id }])
            }
            None => {
                self.enter(State::CheckingExists);
                (self, vec![Effect::CheckExists])
            }
        }
    }

    fn sign(mut self, resource_public_key: Option<String>, transaction_payload: String) -> (Self, Vec<Effect>) {
        if resource_public_key.is_some() {
            self.resource_public_key = resource_public_key;
        }
        self.transaction_payload = Some(transaction_payload.clone());
        self.enter(State::Signing);
        (self, vec![Effect::Sign { transaction_payload }])
    }

    fn subscribe(mut self, job_id: String) -> (Self, Vec<Effect>) {
        self.enter(State::WaitingForProof);
        (self, vec![Effect::Subscribe { job_id }])
    }

    fn forget_job(mut self) -> (Self, Vec<Effect>) {
        self.job_id = None;
        self.enter(State::CheckingExists);
        (self, vec![Effect::ClearJobId, Effect::CheckExists])
    }

    /// Record a failure and either schedule a retry or give up
    fn fail(mut self, error: String) -> (Self, Vec<Effect>) {
        self.errors.push(error);
        if self.retries >= self.max_retries {
            self.enter(State::Failed);
            return (self, Vec::new());
        }
        self.retries += 1;
        self.enter(State::Retry);
        let delay = self.retry_delay;
        (self, vec![Effect::Sleep(delay)])
    }
}

/// Advance the machine by one event.
///
/// Events that make no sense in the current state leave it unchanged.
pub fn transition(mut machine: Machine, event: Event) -> (Machine, Vec<Effect>) {
    use Event as E;
    use State as S;

    if machine.state.is_terminal() {
        return (machine, Vec::new());
    }

    match (machine.state, event) {
        (S::Init, E::Start) => machine.start(),

        (S::CheckingExists, E::ExistenceChecked { exists: true }) => {
            machine.enter(S::PoolAlreadyExists);
            (machine, Vec::new())
        }
        (S::CheckingExists, E::ExistenceChecked { exists: false }) => {
            machine.enter(S::Creating);
            let job_id = machine.job_id.clone();
            (machine, vec![Effect::CreateJob { job_id }])
        }

        (S::Creating, E::JobCreated { id, .. }) => {
            machine.job_id = Some(id.clone());
            let (machine, mut effects) = machine.subscribe(id.clone());
            effects.insert(0, Effect::PersistJobId(id));
            (machine, effects)
        }

        (S::GetStatus, E::StatusReceived(snapshot)) => match snapshot.status {
            JobStatus::Completed => match snapshot.transaction_payload {
                Some(payload) => machine.sign(snapshot.resource_public_key, payload),
                None => machine.fail(format!("Job {} completed without a transaction", snapshot.id)),
            },
            JobStatus::Failed => {
                if let Some(reason) = snapshot.failed_reason {
                    machine.errors.push(reason);
                }
                machine.enter(S::Creating);
                let job_id = Some(snapshot.id);
                (machine, vec![Effect::CreateJob { job_id }])
            }
            JobStatus::Waiting | JobStatus::Active => machine.subscribe(snapshot.id),
        },
        (S::GetStatus, E::JobNotFound) | (S::WaitingForProof, E::JobNotFound) => machine.forget_job(),

        (
            S::WaitingForProof,
            E::ProofReady {
                resource_public_key,
                transaction_payload,
            },
        ) => machine.sign(Some(resource_public_key), transaction_payload),
        (S::WaitingForProof, E::JobFailed { reason }) => machine.fail(reason),
        (S::WaitingForProof, E::SubscriptionTimedOut) => match machine.job_id.clone() {
            Some(job_id) => {
                machine.enter(S::GetStatus);
                (machine, vec![Effect::FetchStatus { job_id }])
            }
            None => machine.forget_job(),
        },

        (S::Signing, E::TransactionIncluded { hash }) => {
            machine.transaction_hash = Some(hash);
            match machine.job_id.clone() {
                Some(job_id) => {
                    machine.enter(S::Confirming);
                    (machine, vec![Effect::Confirm { job_id }])
                }
                None => machine.fail("No job to confirm".into()),
            }
        }

        (S::Confirming, E::Confirmed { message }) => {
            machine.message = Some(message);
            machine.enter(S::Completed);
            (machine, vec![Effect::ClearJobId])
        }

        (S::Retry, E::RetryElapsed) => {
            machine.enter(S::Init);
            machine.start()
        }

        (state, E::ActorFailed { error }) if state != S::Retry && state != S::Init => machine.fail(error),

        _ => (machine, Vec::new()),
    }
}
