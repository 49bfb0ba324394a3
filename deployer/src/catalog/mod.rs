//! Static deployment catalog: presets and the model table

pub mod model;
pub mod preset;
