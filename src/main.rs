use std::panic;
use std::sync::Arc;

use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use crate::config::RunnerConfig;
use crate::core::catalog::Catalog;
use crate::core::pipeline::admission::AdmissionController;
use crate::core::pipeline::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::docker::sandbox::DockerSandbox;
use crate::grpc::models::runner_service_server::RunnerServiceServer;
use crate::grpc::services::RunnerServiceImpl;
use crate::memory::counters::InMemoryCounters;
use crate::memory::store::InMemoryStore;

mod config;
mod constants;
mod core;
mod docker;
mod grpc;
mod memory;
#[cfg(test)]
mod stubs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let config = RunnerConfig::from_env()?;
    tracing::info!(?config, "Loaded configuration");

    let catalog = Catalog::from_config(&config)?;
    let sandbox = DockerSandbox::connect(&config.workspace_root)?;
    let store = Arc::new(InMemoryStore::new());

    let orchestrator = Orchestrator::new(
        OrchestratorSettings::from(&config),
        AdmissionController::new(Arc::new(InMemoryCounters::new()), config.admission),
        Arc::new(catalog),
        Arc::new(sandbox),
        store.clone(),
        store,
    );
    let service = RunnerServiceServer::new(RunnerServiceImpl::new(orchestrator));

    tracing::info!(addr = %config.listen_addr, pool_size = config.pool_size, "gRPC server listening");
    Server::builder()
        .add_service(service)
        .serve(config.listen_addr)
        .await?;

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
