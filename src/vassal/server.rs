use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::config::VassalConfig;
use crate::error::{Error, Result};
use crate::proto::vassal_service_server::{VassalService, VassalServiceServer};
use crate::proto::{
    GetVassalInfoRequest, GetVassalInfoResponse, NodeData, StartJobTasksRequest,
    StartJobTasksResponse, StealWorkRequest, StealWorkResponse, UpdateBestSolCostRequest,
    UpdateBestSolCostResponse,
};
use crate::search::TypeRegistry;
use crate::vassal::lord_proxy::LordProxy;
use crate::vassal::manager::VassalJobManager;

/// The worker process: serves the vassal RPC surface, registers with the
/// lord, and runs one [`VassalJobManager`] per active job.
pub struct VassalRunner {
    config: VassalConfig,
    types: Arc<TypeRegistry>,
    lord: Arc<LordProxy>,
    jobs: RwLock<HashMap<u64, Arc<VassalJobManager>>>,
}

impl VassalRunner {
    pub fn new(config: VassalConfig, types: TypeRegistry) -> Arc<Self> {
        let lord = Arc::new(LordProxy::new(config.lord_addr.clone()));
        Arc::new(Self {
            config,
            types: Arc::new(types),
            lord,
            jobs: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &VassalConfig {
        &self.config
    }

    pub async fn job(&self, job_id: u64) -> Result<Arc<VassalJobManager>> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Announces this vassal to the lord, retrying while the lord comes
    /// up. Gives up after the configured number of attempts.
    pub async fn register_with_lord(&self) -> Result<()> {
        let port = self.config.listen_addr.port();
        let mut last_err = None;
        for attempt in 1..=self.config.register_attempts {
            match self
                .lord
                .register_vassal(&self.config.advertise_host, port, self.config.vassal_id)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        vassal_id = self.config.vassal_id,
                        lord = self.lord.addr(),
                        "Registered with the lord"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "Couldn't register with the lord yet"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(tokio::time::Duration::from_millis(
                        self.config.register_retry_ms,
                    ))
                    .await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::Internal("registration disabled by configuration".to_string())
        }))
    }

    /// Serves the vassal RPC surface on the configured address. Blocks.
    pub async fn serve(self: &Arc<Self>) -> Result<()> {
        let addr = self.config.listen_addr;
        tracing::info!(addr = %addr, vassal_id = self.config.vassal_id, "Starting vassal gRPC server");
        Server::builder()
            .add_service(VassalServiceServer::new(VassalGrpc {
                runner: self.clone(),
            }))
            .serve(addr)
            .await?;
        Ok(())
    }

    /// Serves on an already-bound listener. Lets tests use OS-assigned
    /// ports.
    pub async fn serve_with_incoming(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr(), vassal_id = self.config.vassal_id, "Starting vassal gRPC server");
        Server::builder()
            .add_service(VassalServiceServer::new(VassalGrpc {
                runner: self.clone(),
            }))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;
        Ok(())
    }

    /// Accepts the initial assignment for a new job and spawns its
    /// evaluation slots. A duplicate launch is logged and ignored.
    pub async fn start_job(self: &Arc<Self>, request: StartJobTasksRequest) -> Result<()> {
        let problem_data = request
            .problem
            .as_ref()
            .ok_or_else(|| Error::Decode("missing problem".to_string()))?;
        let problem = self.types.decode_problem(problem_data)?;
        let nodes = self.types.decode_nodes(&request.nodes, problem.as_ref())?;

        let num_slots = if request.num_slots > 0 {
            request.num_slots
        } else {
            self.config.num_slots
        };

        let manager = Arc::new(VassalJobManager::new(
            request.job_id,
            self.config.vassal_id,
            nodes,
            problem,
            request.best_cost,
            self.types.clone(),
            self.lord.clone(),
        ));

        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&request.job_id) {
                tracing::warn!(job_id = request.job_id, "Job already started, ignoring");
                return Ok(());
            }
            jobs.insert(request.job_id, manager.clone());
        }

        let initial_nodes = manager.frontier_len().await;
        tracing::info!(
            job_id = request.job_id,
            num_slots,
            initial_nodes,
            "Starting job tasks"
        );

        let runner = self.clone();
        tokio::spawn(async move {
            let job_id = manager.job_id();
            manager.run(num_slots).await;
            runner.jobs.write().await.remove(&job_id);
            tracing::info!(job_id, "Job torn down on this vassal");
        });
        Ok(())
    }

    /// Stops every running job. Used at shutdown.
    pub async fn cancel_all(&self) {
        for manager in self.jobs.read().await.values() {
            manager.cancel();
        }
    }
}

/// gRPC facade over [`VassalRunner`].
struct VassalGrpc {
    runner: Arc<VassalRunner>,
}

#[tonic::async_trait]
impl VassalService for VassalGrpc {
    async fn get_vassal_info(
        &self,
        _request: Request<GetVassalInfoRequest>,
    ) -> std::result::Result<Response<GetVassalInfoResponse>, Status> {
        Ok(Response::new(GetVassalInfoResponse {
            vassal_id: self.runner.config.vassal_id,
            num_slots: self.runner.config.num_slots,
        }))
    }

    async fn start_job_tasks(
        &self,
        request: Request<StartJobTasksRequest>,
    ) -> std::result::Result<Response<StartJobTasksResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(job_id = req.job_id, "Received StartJobTasks");
        self.runner.start_job(req).await?;
        Ok(Response::new(StartJobTasksResponse {}))
    }

    async fn steal_work(
        &self,
        request: Request<StealWorkRequest>,
    ) -> std::result::Result<Response<StealWorkResponse>, Status> {
        let req = request.into_inner();
        let manager = self.runner.job(req.job_id).await?;
        let nodes: Vec<NodeData> = manager.relinquish_work().await;
        Ok(Response::new(StealWorkResponse { nodes }))
    }

    async fn update_best_sol_cost(
        &self,
        request: Request<UpdateBestSolCostRequest>,
    ) -> std::result::Result<Response<UpdateBestSolCostResponse>, Status> {
        let req = request.into_inner();
        let manager = self.runner.job(req.job_id).await?;
        manager.update_best_cost(req.cost).await;
        Ok(Response::new(UpdateBestSolCostResponse {}))
    }
}
