//! Shared server-side state for building deployments

mod authorization;
mod setup;

pub use authorization::{AuthorizationService, AuthorizedSigner, NetworkAuthorization};
pub use setup::SetupCache;
