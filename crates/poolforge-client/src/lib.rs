//! Poolforge Client
//!
//! Drives one pool or factory deployment from request to confirmation:
//!
//! 1. Check the ledger for an existing resource
//! 2. Create a job and wait for its attested transaction
//! 3. Have the wallet sign and submit it, then wait for inclusion
//! 4. Confirm the job so the server drops it
//!
//! The in-flight job id is persisted, so a restarted client resumes from the
//! job's status instead of starting over. Failures are retried a bounded
//! number of times with a fixed delay.
//!
//! ## Usage
//!
//! ```ignore
//! use poolforge_client::{HttpJobApi, MemoryJobIdStore, Orchestrator, ResourceRequest};
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(HttpJobApi::new("http://localhost:8080")?),
//!     ledger,
//!     wallet,
//!     Arc::new(MemoryJobIdStore::new()),
//! );
//! let machine = orchestrator
//!     .run(&ResourceRequest::pool("U1", "net-1", "MINA", "TOK"))
//!     .await?;
//! println!("{}: {:?}", machine.state, machine.message);
//! ```

pub mod api;
pub mod collaborators;
pub mod driver;
pub mod error;
pub mod machine;
pub mod types;

pub use api::{HttpJobApi, JobApi};
pub use collaborators::{FileJobIdStore, JobIdStore, Ledger, MemoryJobIdStore, Wallet};
pub use driver::{Orchestrator, OrchestratorConfig};
pub use error::{ClientError, Result};
pub use machine::{transition, Effect, Event, Machine, State};
pub use types::{InclusionStatus, ResourceRequest};
