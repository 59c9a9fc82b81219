//! Closed-loop control module
//!
//! - Actuator trait and reference actuators ([`actuator`])
//! - One-step analysis engine ([`engine`])
//! - Producer and consumer thread loops ([`runner`])

pub mod actuator;
pub mod engine;
pub mod runner;
