pub mod admission;
pub mod assembling;
pub mod orchestrator;
pub mod provisioning;
pub mod testing;
