//! Deployment job worker

mod deploy;
mod pool;

pub use deploy::{DeploymentWorker, KEYGEN_ATTEMPTS};
pub use pool::WorkerPool;
