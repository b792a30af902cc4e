use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tonic::transport::Channel;

use crate::error::{Error, Result};
use crate::proto::vassal_service_client::VassalServiceClient;
use crate::proto::{
    GetVassalInfoRequest, NodeData, StartJobTasksRequest, StealWorkRequest,
    UpdateBestSolCostRequest,
};
use crate::search::{Problem, SearchNode, TypeRegistry};

/// Lord-side operations addressing one remote vassal.
///
/// Implementations must answer `vassal_id` without network I/O: it keys the
/// belief map and the steal queue on every hot-path decision, where an RPC
/// round trip would stall the whole steal loop.
#[async_trait]
pub trait VassalLink: Send + Sync {
    /// The vassal's id, from the local cache.
    fn vassal_id(&self) -> u64;

    /// Local parallelism of the vassal, fetched once and cached. Used only
    /// at job-launch time.
    async fn num_slots(&self) -> Result<u32>;

    /// Push the initial work assignment for a freshly launched job.
    async fn start_job_tasks(
        &self,
        nodes: &[Box<dyn SearchNode>],
        problem: &dyn Problem,
        best_cost: f64,
        job_id: u64,
        num_slots: u32,
    ) -> Result<()>;

    /// Ask the vassal to relinquish part of its local frontier. An empty
    /// reply means it had nothing to spare; a transport error means it was
    /// unreachable.
    async fn steal_work(&self, job_id: u64) -> Result<Vec<NodeData>>;

    /// Push an improved global bound.
    async fn update_best_sol_cost(&self, cost: f64, job_id: u64) -> Result<()>;
}

/// gRPC-backed [`VassalLink`], created at registration and reused across
/// jobs. Connects lazily; the channel reconnects on its own after failures.
/// Carries no per-job state.
pub struct VassalProxy {
    vassal_id: u64,
    addr: String,
    rpc_timeout_ms: u64,
    client: Mutex<Option<VassalServiceClient<Channel>>>,
    num_slots: Mutex<Option<u32>>,
}

impl VassalProxy {
    pub fn new(host: &str, port: u16, vassal_id: u64, rpc_timeout_ms: u64) -> Self {
        Self {
            vassal_id,
            addr: format!("{}:{}", host, port),
            rpc_timeout_ms,
            client: Mutex::new(None),
            num_slots: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    fn timeout_error(&self) -> Error {
        Error::RpcTimeout {
            vassal_id: self.vassal_id,
            timeout_ms: self.rpc_timeout_ms,
        }
    }

    async fn client(&self) -> Result<VassalServiceClient<Channel>> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let endpoint = format!("http://{}", self.addr);
        let client = timeout(self.deadline(), VassalServiceClient::connect(endpoint))
            .await
            .map_err(|_| self.timeout_error())??;
        *guard = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl VassalLink for VassalProxy {
    fn vassal_id(&self) -> u64 {
        self.vassal_id
    }

    async fn num_slots(&self) -> Result<u32> {
        if let Some(slots) = *self.num_slots.lock().await {
            return Ok(slots);
        }
        let mut client = self.client().await?;
        let response = timeout(self.deadline(), client.get_vassal_info(GetVassalInfoRequest {}))
            .await
            .map_err(|_| self.timeout_error())??;
        let info = response.into_inner();
        if info.vassal_id != self.vassal_id {
            tracing::warn!(
                registered = self.vassal_id,
                reported = info.vassal_id,
                "Vassal reports a different id than it registered with"
            );
        }
        *self.num_slots.lock().await = Some(info.num_slots);
        Ok(info.num_slots)
    }

    async fn start_job_tasks(
        &self,
        nodes: &[Box<dyn SearchNode>],
        problem: &dyn Problem,
        best_cost: f64,
        job_id: u64,
        num_slots: u32,
    ) -> Result<()> {
        let mut client = self.client().await?;
        let request = StartJobTasksRequest {
            nodes: nodes
                .iter()
                .map(|n| TypeRegistry::encode_node(n.as_ref()))
                .collect(),
            problem: Some(TypeRegistry::encode_problem(problem)),
            best_cost,
            job_id,
            num_slots,
        };
        timeout(self.deadline(), client.start_job_tasks(request))
            .await
            .map_err(|_| self.timeout_error())??;
        Ok(())
    }

    async fn steal_work(&self, job_id: u64) -> Result<Vec<NodeData>> {
        let mut client = self.client().await?;
        let request = StealWorkRequest { job_id };
        let response = timeout(self.deadline(), client.steal_work(request))
            .await
            .map_err(|_| self.timeout_error())??;
        Ok(response.into_inner().nodes)
    }

    async fn update_best_sol_cost(&self, cost: f64, job_id: u64) -> Result<()> {
        let mut client = self.client().await?;
        let request = UpdateBestSolCostRequest { cost, job_id };
        timeout(self.deadline(), client.update_best_sol_cost(request))
            .await
            .map_err(|_| self.timeout_error())??;
        Ok(())
    }
}
