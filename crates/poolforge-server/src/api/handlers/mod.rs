//! API request handlers

pub mod jobs;
pub mod multisig;
pub mod signers;

pub use jobs::{
    confirm_job, create_pool, deploy_factory, job_events, job_status, AppState, ConfirmResponse,
    CreatePoolRequest, DeployFactoryRequest,
};
pub use multisig::create_multisig_signature;
pub use signers::{
    deactivate_grant, network_authorization, register_signer, set_grant, GrantResponse,
    NetworkAuthorizationResponse, RegisterSignerRequest, SetGrantRequest, SignerResponse,
};
