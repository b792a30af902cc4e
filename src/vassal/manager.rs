use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::proto::NodeData;
use crate::search::{Problem, SearchNode, Solution, TypeRegistry};
use crate::vassal::lord_proxy::LordProxy;

/// Transport failures tolerated contacting the lord before a slot gives up.
const MAX_LORD_ATTEMPTS: u32 = 3;
const LORD_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// How long an idle slot waits for a busy sibling to publish children.
const LOCAL_WAIT: Duration = Duration::from_millis(10);

struct LocalState {
    /// LIFO: the most recently produced (deepest, most preferred) node is
    /// taken first, giving each slot depth-first behavior.
    frontier: Vec<Box<dyn SearchNode>>,
    /// Local view of the cluster-wide bound. Only ever lowered.
    best_cost: f64,
    best_solution: Option<Box<dyn Solution>>,
    /// Slots currently evaluating a node. While nonzero, an empty frontier
    /// does not mean this vassal is out of work: children may still appear.
    active_evaluations: u32,
}

/// Worker-side manager for one job: local frontier, evaluation slots, and
/// the steal responder.
pub struct VassalJobManager {
    job_id: u64,
    vassal_id: u64,
    problem: Arc<dyn Problem>,
    types: Arc<TypeRegistry>,
    lord: Arc<LordProxy>,
    state: Mutex<LocalState>,
    /// Serializes slots asking the lord for work. Without it two slots can
    /// ask back to back and the second ask unlists this vassal lord-side
    /// right after the first was handed fresh work, which can complete the
    /// job while that work is still unevaluated.
    ask_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl VassalJobManager {
    pub fn new(
        job_id: u64,
        vassal_id: u64,
        initial_nodes: Vec<Box<dyn SearchNode>>,
        problem: Arc<dyn Problem>,
        best_cost: f64,
        types: Arc<TypeRegistry>,
        lord: Arc<LordProxy>,
    ) -> Self {
        Self {
            job_id,
            vassal_id,
            problem,
            types,
            lord,
            state: Mutex::new(LocalState {
                frontier: initial_nodes,
                best_cost,
                best_solution: None,
                active_evaluations: 0,
            }),
            ask_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub async fn frontier_len(&self) -> usize {
        self.state.lock().await.frontier.len()
    }

    pub async fn best_cost(&self) -> f64 {
        self.state.lock().await.best_cost
    }

    /// Stops the evaluation slots. Used at teardown.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The lord pushed an improved global bound. Never raises the local
    /// one: pushes can arrive out of order with our own discoveries.
    pub async fn update_best_cost(&self, cost: f64) {
        let mut state = self.state.lock().await;
        if cost < state.best_cost {
            tracing::debug!(job_id = self.job_id, cost, "Adopting pushed bound");
            state.best_cost = cost;
        }
    }

    /// Steal responder: relinquishes the older (shallower) half of the
    /// local frontier, already encoded for the wire. A frontier with one
    /// node or none has nothing to spare.
    pub async fn relinquish_work(&self) -> Vec<NodeData> {
        let mut state = self.state.lock().await;
        let take = state.frontier.len() / 2;
        if take == 0 {
            return Vec::new();
        }
        let relinquished: Vec<NodeData> = state
            .frontier
            .drain(..take)
            .map(|node| TypeRegistry::encode_node(node.as_ref()))
            .collect();
        tracing::info!(
            job_id = self.job_id,
            count = relinquished.len(),
            kept = state.frontier.len(),
            "Relinquishing work to the lord"
        );
        relinquished
    }

    /// Runs `num_slots` evaluation tasks to completion. Returns once every
    /// slot has drained, i.e. once the lord has answered "no work
    /// anywhere" or the job was cancelled.
    pub async fn run(self: Arc<Self>, num_slots: u32) {
        let mut slots = JoinSet::new();
        for slot in 0..num_slots.max(1) {
            let manager = self.clone();
            slots.spawn(async move { manager.run_slot(slot).await });
        }
        while slots.join_next().await.is_some() {}

        let state = self.state.lock().await;
        match &state.best_solution {
            Some(solution) => tracing::info!(
                job_id = self.job_id,
                best = %solution,
                "Job finished on this vassal"
            ),
            None => tracing::info!(
                job_id = self.job_id,
                "Job finished on this vassal, no improving solution found locally"
            ),
        }
    }

    async fn run_slot(&self, slot: u32) {
        let mut lord_failures = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            enum Step {
                Evaluate(Box<dyn SearchNode>, f64),
                WaitForSiblings,
                AskLord,
            }

            let step = {
                let mut state = self.state.lock().await;
                match state.frontier.pop() {
                    Some(node) => {
                        state.active_evaluations += 1;
                        Step::Evaluate(node, state.best_cost)
                    }
                    None if state.active_evaluations > 0 => Step::WaitForSiblings,
                    None => Step::AskLord,
                }
            };

            match step {
                Step::Evaluate(mut node, bound) => {
                    node.evaluate(self.problem.as_ref(), bound);
                    if node.is_solution() {
                        self.record_solution(node.as_ref()).await;
                        self.state.lock().await.active_evaluations -= 1;
                    } else {
                        let mut children = Vec::new();
                        while let Some(child) = node.next_child() {
                            children.push(child);
                        }
                        let mut state = self.state.lock().await;
                        // reversed so the most preferred child is on top
                        while let Some(child) = children.pop() {
                            state.frontier.push(child);
                        }
                        state.active_evaluations -= 1;
                    }
                    // evaluation is synchronous CPU work; give the runtime a
                    // chance between nodes
                    tokio::task::yield_now().await;
                }
                Step::WaitForSiblings => {
                    tokio::time::sleep(LOCAL_WAIT).await;
                }
                Step::AskLord => {
                    let _asking = self.ask_lock.lock().await;
                    // A sibling's request may have refilled the frontier
                    // while we waited for the lock.
                    let best_cost = {
                        let state = self.state.lock().await;
                        if !state.frontier.is_empty() || state.active_evaluations > 0 {
                            continue;
                        }
                        state.best_cost
                    };
                    match self
                        .lord
                        .ask_for_work(self.job_id, self.vassal_id, best_cost)
                        .await
                    {
                        Ok(nodes) if !nodes.is_empty() => {
                            match self.types.decode_nodes(&nodes, self.problem.as_ref()) {
                                Ok(decoded) => {
                                    lord_failures = 0;
                                    tracing::info!(
                                        job_id = self.job_id,
                                        slot,
                                        count = decoded.len(),
                                        "Received work from the lord"
                                    );
                                    self.state.lock().await.frontier.extend(decoded);
                                }
                                Err(e) => {
                                    tracing::error!(
                                        job_id = self.job_id,
                                        error = %e,
                                        "Couldn't decode nodes sent by the lord, slot exiting"
                                    );
                                    return;
                                }
                            }
                        }
                        Ok(_) => {
                            tracing::info!(
                                job_id = self.job_id,
                                slot,
                                "No work left anywhere, slot exiting"
                            );
                            return;
                        }
                        Err(e) => {
                            lord_failures += 1;
                            if lord_failures >= MAX_LORD_ATTEMPTS {
                                tracing::error!(
                                    job_id = self.job_id,
                                    slot,
                                    error = %e,
                                    "Couldn't reach the lord for work, giving up"
                                );
                                return;
                            }
                            tracing::warn!(
                                job_id = self.job_id,
                                slot,
                                error = %e,
                                "Failed to ask the lord for work, will retry"
                            );
                            tokio::time::sleep(LORD_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    /// A completed tour beat the bound it was evaluated under. Adopt it
    /// locally if it still improves, and tell the lord.
    async fn record_solution(&self, node: &dyn SearchNode) {
        let cost = node.cost();
        let improved = {
            let mut state = self.state.lock().await;
            if cost < state.best_cost {
                state.best_cost = cost;
                state.best_solution = node.solution();
                true
            } else {
                false
            }
        };
        if !improved {
            return;
        }
        tracing::info!(job_id = self.job_id, cost, "Found improved solution");
        if let Err(e) = self
            .lord
            .send_best_sol_cost(cost, self.job_id, self.vassal_id)
            .await
        {
            tracing::warn!(
                job_id = self.job_id,
                error = %e,
                "Failed to report improved cost to the lord"
            );
        }
    }
}
