//! Driving the realtime engine from a dedicated thread
//!
//! - `render`: the render loop and its statistics
//! - `ring`: lock-free transport of rendered samples to a monitor
//! - `signal`: test signal sources feeding the loop

pub mod render;
pub mod ring;
pub mod signal;

pub use render::*;
pub use ring::*;
pub use signal::*;
