//! Cadenza infrastructure: render threads, test signals and sample transport.

pub mod audio;
