use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::config::LordConfig;
use crate::error::{Error, Result};
use crate::lord::coordinator::{JobCoordinator, JobOutcome};
use crate::lord::proxy::{VassalLink, VassalProxy};
use crate::lord::registry::{JobRegistry, VassalRegistry};
use crate::lord::starter;
use crate::lord::stats::LordJobStats;
use crate::proto::lord_service_server::{LordService, LordServiceServer};
use crate::proto::{
    AskForWorkRequest, AskForWorkResponse, NodeData, RegisterVassalRequest,
    RegisterVassalResponse, SendBestSolCostRequest, SendBestSolCostResponse,
};
use crate::search::{Problem, SearchNode, TypeRegistry};

/// The central coordinating process: vassal registry, job-launch
/// lifecycle, and dispatch of inbound RPCs to the right job coordinator.
pub struct LordServer {
    config: LordConfig,
    vassals: VassalRegistry,
    jobs: JobRegistry,
    types: Arc<TypeRegistry>,
}

impl LordServer {
    pub fn new(config: LordConfig, types: TypeRegistry) -> Arc<Self> {
        Arc::new(Self {
            config,
            vassals: VassalRegistry::new(),
            jobs: JobRegistry::new(),
            types: Arc::new(types),
        })
    }

    pub fn config(&self) -> &LordConfig {
        &self.config
    }

    pub fn vassals(&self) -> &VassalRegistry {
        &self.vassals
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Serves the lord RPC surface on the configured address. Blocks.
    pub async fn serve(self: &Arc<Self>) -> Result<()> {
        let addr = self.config.listen_addr;
        tracing::info!(addr = %addr, "Starting lord gRPC server");
        Server::builder()
            .add_service(LordServiceServer::new(LordGrpc {
                server: self.clone(),
            }))
            .serve(addr)
            .await?;
        Ok(())
    }

    /// Serves on an already-bound listener. Lets tests use OS-assigned
    /// ports.
    pub async fn serve_with_incoming(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr(), "Starting lord gRPC server");
        Server::builder()
            .add_service(LordServiceServer::new(LordGrpc {
                server: self.clone(),
            }))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;
        Ok(())
    }

    /// Registers a vassal reachable at `host:port`. Idempotent by id.
    pub async fn register_vassal(&self, host: &str, port: u16, vassal_id: u64) {
        let proxy = Arc::new(VassalProxy::new(
            host,
            port,
            vassal_id,
            self.config.rpc_timeout_ms,
        ));
        self.vassals.register(proxy).await;
    }

    /// Blocks until at least `num_vassals` are registered, then launches
    /// the job on exactly that many. The wait resolves on each
    /// registration rather than polling.
    pub async fn run_job_when_enough_vassals(
        &self,
        root: Box<dyn SearchNode>,
        problem: Arc<dyn Problem>,
        best_cost: f64,
        num_vassals: usize,
    ) -> Result<u64> {
        let mut count_rx = self.vassals.subscribe_count();
        loop {
            let count = *count_rx.borrow_and_update();
            if count >= num_vassals {
                break;
            }
            tracing::info!(
                registered = count,
                waiting_for = num_vassals - count,
                "Waiting for vassals to register"
            );
            if count_rx.changed().await.is_err() {
                return Err(Error::Internal("vassal registry closed".to_string()));
            }
        }
        tracing::info!("Done waiting for vassals to register");
        let vassals = self.vassals.first_n(num_vassals).await;
        self.run_job(
            root,
            problem,
            best_cost,
            vassals,
            self.config.min_nodes_to_save,
        )
        .await
    }

    /// Launches one job on the given vassals: expands the root into an
    /// initial frontier of at least `vassals.len() + min_nodes_to_save`
    /// nodes, hands exactly one node to each vassal, and keeps the surplus
    /// as the lord-side steal reserve.
    pub async fn run_job(
        &self,
        root: Box<dyn SearchNode>,
        problem: Arc<dyn Problem>,
        best_cost: f64,
        vassals: Vec<Arc<dyn VassalLink>>,
        min_nodes_to_save: usize,
    ) -> Result<u64> {
        let job_id = self.jobs.allocate_id();
        let stats = Arc::new(LordJobStats::new());
        stats.about_to_start();

        let mut frontier = starter::build_frontier(
            problem.as_ref(),
            best_cost,
            root,
            vassals.len() + min_nodes_to_save,
        );
        if frontier.len() < vassals.len() {
            return Err(Error::Internal(format!(
                "root expansion produced {} nodes for {} vassals",
                frontier.len(),
                vassals.len()
            )));
        }
        tracing::info!(
            job_id,
            extra_start_nodes = frontier.len() - vassals.len(),
            "Initial frontier built"
        );

        let initial: Vec<Box<dyn SearchNode>> = frontier.drain(..vassals.len()).collect();
        let coordinator = Arc::new(JobCoordinator::new(
            job_id,
            frontier,
            problem.clone(),
            vassals.clone(),
            self.types.clone(),
            stats.clone(),
            self.config.max_failed_steal_attempts,
            self.config.stats_path.clone(),
        ));
        self.jobs.insert(coordinator).await;

        for (vassal, node) in vassals.iter().zip(initial) {
            let num_slots = match vassal.num_slots().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(
                        job_id,
                        vassal_id = vassal.vassal_id(),
                        error = %e,
                        "Couldn't reach vassal for slot count, skipping its initial node"
                    );
                    continue;
                }
            };
            tracing::info!(
                job_id,
                vassal_id = vassal.vassal_id(),
                "About to start job on vassal"
            );
            if let Err(e) = vassal
                .start_job_tasks(&[node], problem.as_ref(), best_cost, job_id, num_slots)
                .await
            {
                tracing::error!(
                    job_id,
                    vassal_id = vassal.vassal_id(),
                    error = %e,
                    "Failed to start job tasks on vassal"
                );
            }
        }
        stats.finished_sending_initial_work();
        Ok(job_id)
    }

    /// Resolves when the job reaches its terminal state.
    pub async fn wait_for_outcome(&self, job_id: u64) -> Result<JobOutcome> {
        let coordinator = self.jobs.get(job_id).await?;
        let mut outcome_rx = coordinator.subscribe_outcome();
        loop {
            if let Some(outcome) = outcome_rx.borrow_and_update().clone() {
                return Ok(outcome);
            }
            if outcome_rx.changed().await.is_err() {
                return Err(Error::Internal(format!(
                    "job {} coordinator dropped before reaching a terminal state",
                    job_id
                )));
            }
        }
    }

    /// RPC path: resolve job and vassal, fold in the caller's reported
    /// best cost, and run the work-request algorithm on its behalf.
    pub async fn ask_for_work(
        &self,
        job_id: u64,
        vassal_id: u64,
        reported_best_cost: f64,
    ) -> Result<Vec<NodeData>> {
        let coordinator = self.jobs.get(job_id).await?;
        self.vassals.get(vassal_id).await?;
        coordinator.update_min_cost(reported_best_cost, vassal_id).await;
        let nodes = coordinator.ask_for_work(vassal_id).await?;
        Ok(nodes
            .iter()
            .map(|n| TypeRegistry::encode_node(n.as_ref()))
            .collect())
    }

    /// RPC path: a vassal reports an improved solution cost.
    pub async fn send_best_sol_cost(&self, cost: f64, job_id: u64, vassal_id: u64) -> Result<()> {
        self.vassals.get(vassal_id).await?;
        let coordinator = self.jobs.get(job_id).await?;
        coordinator.update_min_cost(cost, vassal_id).await;
        Ok(())
    }
}

/// gRPC facade over [`LordServer`].
struct LordGrpc {
    server: Arc<LordServer>,
}

#[tonic::async_trait]
impl LordService for LordGrpc {
    async fn register_vassal(
        &self,
        request: Request<RegisterVassalRequest>,
    ) -> std::result::Result<Response<RegisterVassalResponse>, Status> {
        let req = request.into_inner();
        let port = u16::try_from(req.port)
            .map_err(|_| Status::invalid_argument(format!("port {} out of range", req.port)))?;
        self.server
            .register_vassal(&req.host, port, req.vassal_id)
            .await;
        Ok(Response::new(RegisterVassalResponse {}))
    }

    async fn ask_for_work(
        &self,
        request: Request<AskForWorkRequest>,
    ) -> std::result::Result<Response<AskForWorkResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            job_id = req.job_id,
            vassal_id = req.vassal_id,
            "Received AskForWork"
        );
        let nodes = self
            .server
            .ask_for_work(req.job_id, req.vassal_id, req.best_cost)
            .await?;
        Ok(Response::new(AskForWorkResponse { nodes }))
    }

    async fn send_best_sol_cost(
        &self,
        request: Request<SendBestSolCostRequest>,
    ) -> std::result::Result<Response<SendBestSolCostResponse>, Status> {
        let req = request.into_inner();
        self.server
            .send_best_sol_cost(req.cost, req.job_id, req.vassal_id)
            .await?;
        Ok(Response::new(SendBestSolCostResponse {}))
    }
}
