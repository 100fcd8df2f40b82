//! Process-local implementations of the persistence and counter traits.
//! State is lost on restart.

pub mod counters;
pub mod store;
