pub mod counters;
pub mod sandbox;
pub mod store;
