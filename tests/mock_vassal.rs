//! A scriptable in-process vassal for exercising the lord without a network.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use bnb_cluster::error::{Error, Result};
use bnb_cluster::lord::VassalLink;
use bnb_cluster::proto::NodeData;
use bnb_cluster::search::tsp::{City, TspNode, TspProblem};
use bnb_cluster::search::{Problem, SearchNode};

/// What the mock answers to the next `steal_work` call.
#[derive(Clone)]
pub enum StealReply {
    /// Hand back one node with this tour.
    Give(Vec<i32>),
    Empty,
    Unreachable,
}

pub struct MockVassal {
    id: u64,
    scripted: Mutex<VecDeque<StealReply>>,
    default_reply: Mutex<StealReply>,
    pub steal_calls: AtomicU32,
    /// Shared across mocks so tests can assert the global steal order.
    steal_log: Arc<Mutex<Vec<u64>>>,
    pub bound_updates: Mutex<Vec<f64>>,
    /// (node count, job id, num slots) per start_job_tasks call.
    pub started: Mutex<Vec<(usize, u64, u32)>>,
}

impl MockVassal {
    pub fn new(id: u64, steal_log: Arc<Mutex<Vec<u64>>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            scripted: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(StealReply::Empty),
            steal_calls: AtomicU32::new(0),
            steal_log,
            bound_updates: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
        })
    }

    pub async fn script(&self, replies: Vec<StealReply>) {
        self.scripted.lock().await.extend(replies);
    }

    pub async fn set_default_reply(&self, reply: StealReply) {
        *self.default_reply.lock().await = reply;
    }
}

#[async_trait]
impl VassalLink for MockVassal {
    fn vassal_id(&self) -> u64 {
        self.id
    }

    async fn num_slots(&self) -> Result<u32> {
        Ok(1)
    }

    async fn start_job_tasks(
        &self,
        nodes: &[Box<dyn SearchNode>],
        _problem: &dyn Problem,
        _best_cost: f64,
        job_id: u64,
        num_slots: u32,
    ) -> Result<()> {
        self.started.lock().await.push((nodes.len(), job_id, num_slots));
        Ok(())
    }

    async fn steal_work(&self, _job_id: u64) -> Result<Vec<NodeData>> {
        self.steal_calls.fetch_add(1, Ordering::SeqCst);
        self.steal_log.lock().await.push(self.id);
        let reply = match self.scripted.lock().await.pop_front() {
            Some(reply) => reply,
            None => self.default_reply.lock().await.clone(),
        };
        match reply {
            StealReply::Give(tour) => Ok(vec![encoded_tour(&tour)]),
            StealReply::Empty => Ok(Vec::new()),
            StealReply::Unreachable => {
                Err(Error::Grpc(tonic::Status::unavailable("vassal down")))
            }
        }
    }

    async fn update_best_sol_cost(&self, cost: f64, _job_id: u64) -> Result<()> {
        self.bound_updates.lock().await.push(cost);
        Ok(())
    }
}

/// Cities 0..n spread along a line.
pub fn line_problem(n: i32) -> Arc<TspProblem> {
    Arc::new(TspProblem::new(
        (0..n).map(|i| City::new(i, 0, i)).collect(),
    ))
}

pub fn encoded_tour(tour: &[i32]) -> NodeData {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(tour.len() as i32).to_be_bytes());
    for &id in tour {
        payload.extend_from_slice(&id.to_be_bytes());
    }
    NodeData {
        node_type: "tsp".to_string(),
        payload,
    }
}

pub fn tour_node(problem: &TspProblem, tour: &[i32]) -> Box<dyn SearchNode> {
    Box::new(TspNode::from_bytes(&encoded_tour(tour).payload, problem).expect("valid test tour"))
}
