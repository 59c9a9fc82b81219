//! Loop statistics

pub mod counters;
