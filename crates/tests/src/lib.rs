//! Cross-crate integration tests for Cadenza


#[cfg(test)]
mod chain_persistence;
#[cfg(test)]
mod engine_scenarios;
#[cfg(test)]
mod render_integration;
