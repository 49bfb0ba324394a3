//! Deployment engine
//!
//! The state machine in [`fsm`] sequences a run, [`files`] performs the
//! target mutations, and [`lock`] keeps concurrent runs off the same
//! target.

pub mod files;
pub mod fsm;
pub mod lock;
