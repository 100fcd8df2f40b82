use tokio::sync::mpsc::channel;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::{
    constants::STREAM_CHANNEL_CAPACITY,
    core::{
        domain,
        pipeline::orchestrator::{Orchestrator, RunEvent, RunOutcome},
    },
    grpc::{
        mappers::{self, ConversionError},
        models::{
            Queued, RunRequest, RunUpdate, Running, Usage, UsageRequest, run_update::Update,
            runner_service_server::RunnerService,
        },
    },
};

#[derive(Clone, Debug)]
pub struct RunnerServiceImpl {
    orchestrator: Orchestrator,
}

impl RunnerServiceImpl {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[tonic::async_trait]
impl RunnerService for RunnerServiceImpl {
    type SubmitRunStream = ReceiverStream<Result<RunUpdate, Status>>;

    #[tracing::instrument(skip_all)]
    async fn submit_run(
        &self,
        request: Request<RunRequest>,
    ) -> Result<Response<Self::SubmitRunStream>, Status> {
        let domain_request: Result<domain::RunRequest, ConversionError> =
            request.into_inner().try_into();
        let domain_request = domain_request.map_err(|e| Status::invalid_argument(e.to_string()))?;
        domain_request
            .validate()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        tracing::info!(
            user_id = %domain_request.user_id,
            language = %domain_request.language,
            kind = ?domain_request.target.kind(),
            cases = domain_request.test_suite.cases.len(),
            "Received run request"
        );

        let (stream_tx, stream_rx) = channel(STREAM_CHANNEL_CAPACITY);
        let (event_tx, mut event_rx) = channel(STREAM_CHANNEL_CAPACITY);

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.run(domain_request, event_tx).await;
        });

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if stream_tx.send(to_update(event)).await.is_err() {
                    tracing::debug!("Client disconnected, run continues without updates");
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(stream_rx)))
    }

    #[tracing::instrument(skip_all)]
    async fn get_usage(&self, request: Request<UsageRequest>) -> Result<Response<Usage>, Status> {
        let user_id = request.into_inner().user_id;
        if user_id.trim().is_empty() {
            return Err(Status::invalid_argument("user id must not be empty"));
        }

        let snapshot = self.orchestrator.usage(&user_id).await;
        let ceilings = self.orchestrator.admission().ceilings();
        Ok(Response::new(mappers::usage(snapshot, ceilings)))
    }
}

fn to_update(event: RunEvent) -> Result<RunUpdate, Status> {
    let update = match event {
        RunEvent::Queued(id) => Update::Queued(Queued {
            submission_id: id.to_string(),
        }),
        RunEvent::Running(id) => Update::Running(Running {
            submission_id: id.to_string(),
        }),
        RunEvent::Done(RunOutcome::Completed(done)) => Update::Finished(done.into()),
        RunEvent::Done(RunOutcome::Rejected(rejection)) => Update::Rejected(rejection.into()),
        RunEvent::Done(RunOutcome::Aborted { error_message }) => {
            return Err(Status::unavailable(error_message));
        }
    };
    Ok(RunUpdate {
        update: Some(update),
    })
}
