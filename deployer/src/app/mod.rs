//! Application layer
//!
//! [`options`] turns parsed CLI arguments into an immutable
//! [`options::DeploymentConfig`]; [`run`] drives the deployment state
//! machine against it.

pub mod options;
pub mod run;
