//! Filesystem primitives for deployment

pub mod dir;
pub mod file;
