//! API handlers module

pub mod eval;
pub mod health;
pub mod metrics;
pub mod search;
