//! BDD step definitions for slotwatch service

pub mod lifecycle_steps;
pub mod monitor_steps;
pub mod probe_steps;
