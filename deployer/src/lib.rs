//! gwdeploy: deploys LLM gateway configuration bundles
//!
//! Takes a versioned source tree of gateway templates, model definitions
//! and helper scripts and installs it into a user-specific runtime
//! directory, with environment resolution, config merging, atomic file
//! placement, backup/rollback, and pre/post validation gates.

pub mod app;
pub mod audit;
pub mod backup;
pub mod catalog;
pub mod cli;
pub mod deploy;
pub mod envresolve;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod merge;
pub mod storage;
pub mod utils;
pub mod validate;
