//! Target directory layout and host settings handling

pub mod layout;
pub mod settings;
