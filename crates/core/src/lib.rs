//! Cadenza core: real-time effect chains and the engine that drives them.

pub mod domain;

pub use domain::*;
