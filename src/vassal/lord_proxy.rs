use tokio::sync::Mutex;
use tonic::transport::Channel;

use crate::error::Result;
use crate::proto::lord_service_client::LordServiceClient;
use crate::proto::{
    AskForWorkRequest, NodeData, RegisterVassalRequest, SendBestSolCostRequest,
};

/// Vassal-side client for the lord. Connects lazily and keeps the channel;
/// tonic reconnects it after transient failures.
///
/// `ask_for_work` carries no deadline on purpose: the lord may block the
/// call while it steals from peers on our behalf.
pub struct LordProxy {
    addr: String,
    client: Mutex<Option<LordServiceClient<Channel>>>,
}

impl LordProxy {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            client: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn client(&self) -> Result<LordServiceClient<Channel>> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = LordServiceClient::connect(format!("http://{}", self.addr)).await?;
        *guard = Some(client.clone());
        Ok(client)
    }

    pub async fn register_vassal(&self, host: &str, port: u16, vassal_id: u64) -> Result<()> {
        let mut client = self.client().await?;
        client
            .register_vassal(RegisterVassalRequest {
                host: host.to_string(),
                port: port as u32,
                vassal_id,
            })
            .await?;
        Ok(())
    }

    pub async fn ask_for_work(
        &self,
        job_id: u64,
        vassal_id: u64,
        best_cost: f64,
    ) -> Result<Vec<NodeData>> {
        let mut client = self.client().await?;
        let response = client
            .ask_for_work(AskForWorkRequest {
                job_id,
                vassal_id,
                best_cost,
            })
            .await?;
        Ok(response.into_inner().nodes)
    }

    pub async fn send_best_sol_cost(&self, cost: f64, job_id: u64, vassal_id: u64) -> Result<()> {
        let mut client = self.client().await?;
        client
            .send_best_sol_cost(SendBestSolCostRequest {
                cost,
                job_id,
                vassal_id,
            })
            .await?;
        Ok(())
    }
}
