use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::lord::proxy::VassalLink;
use crate::lord::stats::LordJobStats;
use crate::search::{Problem, SearchNode, TypeRegistry};

/// Terminal state of a job, set exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { best_cost: f64 },
    Failed { reason: String },
}

struct JobState {
    /// Unevaluated nodes not yet assigned to any vassal.
    frontier: VecDeque<Box<dyn SearchNode>>,
    /// Best solution cost seen anywhere in the cluster. Only decreases.
    min_cost: f64,
    done: bool,
    failed: bool,
}

/// Owns one job: its frontier, its best cost, and the work-stealing loop
/// run on behalf of idle vassals.
///
/// The frontier and the best cost live behind one lock. The belief map and
/// the rotating candidate queue are separate structures; whenever a path
/// touches both, the belief map is mutated first so no candidate sits in the
/// queue with stale membership.
pub struct JobCoordinator {
    job_id: u64,
    problem: Arc<dyn Problem>,
    /// Fixed list of participants, set at launch.
    vassals: Vec<Arc<dyn VassalLink>>,
    types: Arc<TypeRegistry>,
    max_failed_steal_attempts: u32,
    state: Mutex<JobState>,
    /// Belief map: which vassals we think currently hold stealable work.
    /// May be stale; a fruitless steal is how we find out.
    has_work: Mutex<HashSet<u64>>,
    /// Round-robin order for picking the next steal candidate.
    next_vassal: Mutex<VecDeque<Arc<dyn VassalLink>>>,
    stats: Arc<LordJobStats>,
    stats_path: Option<PathBuf>,
    outcome_tx: watch::Sender<Option<JobOutcome>>,
}

impl JobCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: u64,
        frontier: Vec<Box<dyn SearchNode>>,
        problem: Arc<dyn Problem>,
        vassals: Vec<Arc<dyn VassalLink>>,
        types: Arc<TypeRegistry>,
        stats: Arc<LordJobStats>,
        max_failed_steal_attempts: u32,
        stats_path: Option<PathBuf>,
    ) -> Self {
        let mut has_work = HashSet::new();
        let mut next_vassal = VecDeque::new();
        for vassal in &vassals {
            has_work.insert(vassal.vassal_id());
            next_vassal.push_back(vassal.clone());
        }
        let (outcome_tx, _) = watch::channel(None);
        Self {
            job_id,
            problem,
            vassals,
            types,
            max_failed_steal_attempts,
            state: Mutex::new(JobState {
                frontier: frontier.into(),
                min_cost: f64::MAX,
                done: false,
                failed: false,
            }),
            has_work: Mutex::new(has_work),
            next_vassal: Mutex::new(next_vassal),
            stats,
            stats_path,
            outcome_tx,
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn problem(&self) -> &Arc<dyn Problem> {
        &self.problem
    }

    pub fn stats(&self) -> &Arc<LordJobStats> {
        &self.stats
    }

    pub async fn frontier_len(&self) -> usize {
        self.state.lock().await.frontier.len()
    }

    pub async fn best_cost(&self) -> f64 {
        self.state.lock().await.min_cost
    }

    pub async fn is_done(&self) -> bool {
        self.state.lock().await.done
    }

    pub async fn is_failed(&self) -> bool {
        self.state.lock().await.failed
    }

    pub async fn believes_has_work(&self, vassal_id: u64) -> bool {
        self.has_work.lock().await.contains(&vassal_id)
    }

    /// Resolves once, when the job reaches its terminal state.
    pub fn subscribe_outcome(&self) -> watch::Receiver<Option<JobOutcome>> {
        self.outcome_tx.subscribe()
    }

    /// Serves a vassal whose local frontier ran dry.
    ///
    /// Tries the lord-side frontier first; otherwise walks the candidate
    /// queue round-robin, stealing from peers still believed to hold work.
    /// Returns an empty batch exactly when the whole job has completed, and
    /// `Error::JobFailed` when a candidate stayed unreachable past the
    /// failure threshold.
    pub async fn ask_for_work(&self, vassal_id: u64) -> Result<Vec<Box<dyn SearchNode>>> {
        let started = Instant::now();
        // The caller just ran dry. Unlist it before anything else so a
        // concurrent steal on its behalf cannot target it.
        self.has_work.lock().await.remove(&vassal_id);

        {
            let mut state = self.state.lock().await;
            if state.failed {
                return Err(self.job_failed_error());
            }
            if let Some(node) = state.frontier.pop_front() {
                self.has_work.lock().await.insert(vassal_id);
                tracing::info!(
                    job_id = self.job_id,
                    vassal_id,
                    frontier_remaining = state.frontier.len(),
                    "Sending work from the lord frontier"
                );
                return Ok(vec![node]);
            }
        }

        // Transport failures per candidate, local to this request.
        let mut failed_attempts: HashMap<u64, u32> = HashMap::new();
        let mut fruitless_attempts = 0u32;
        loop {
            // Check every pass: both maps change under us while we block on
            // steal RPCs.
            if self.state.lock().await.failed {
                return Err(self.job_failed_error());
            }
            if self.has_work.lock().await.is_empty() {
                // Nobody, lord frontier included, holds unassigned work.
                self.done().await;
                return Ok(Vec::new());
            }

            let candidate = {
                let mut queue = self.next_vassal.lock().await;
                match queue.pop_front() {
                    Some(candidate) => {
                        queue.push_back(candidate.clone());
                        candidate
                    }
                    None => {
                        return Err(Error::Internal(format!(
                            "job {} has no registered vassals",
                            self.job_id
                        )))
                    }
                }
            };
            let candidate_id = candidate.vassal_id();

            let failures = failed_attempts.get(&candidate_id).copied().unwrap_or(0);
            if failures >= self.max_failed_steal_attempts {
                tracing::error!(
                    job_id = self.job_id,
                    vassal_id = candidate_id,
                    attempts = failures,
                    "Failed to contact vassal too many times, marking job failed"
                );
                return Err(self.fail_job(candidate_id).await);
            }

            if !self.has_work.lock().await.contains(&candidate_id) {
                continue;
            }

            match candidate.steal_work(self.job_id).await {
                Ok(stolen) if !stolen.is_empty() => {
                    let nodes = self.types.decode_nodes(&stolen, self.problem.as_ref())?;
                    self.has_work.lock().await.insert(vassal_id);
                    self.stats
                        .report_work_stolen(started.elapsed(), fruitless_attempts);
                    tracing::info!(
                        job_id = self.job_id,
                        vassal_id,
                        stolen_from = candidate_id,
                        count = nodes.len(),
                        "Stole work for idle vassal"
                    );
                    return Ok(nodes);
                }
                Ok(_) => {
                    // The belief was stale: the peer went dry between our
                    // bookkeeping and the call. Not an error, not penalized.
                    fruitless_attempts += 1;
                }
                Err(Error::Grpc(status)) if status.code() == tonic::Code::NotFound => {
                    // The peer doesn't know this job, either not launched
                    // there yet or already torn down. Nothing to spare, and
                    // not a transport failure.
                    fruitless_attempts += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = self.job_id,
                        vassal_id = candidate_id,
                        error = %e,
                        "Problem stealing work from vassal"
                    );
                    *failed_attempts.entry(candidate_id).or_insert(0) += 1;
                    fruitless_attempts += 1;
                }
            }
        }
    }

    /// Folds in a cost reported by `source_id` and, if it improves the
    /// job's best, pushes the new bound to every other vassal. Pushes are
    /// best effort: a vassal missing one merely prunes less until the next.
    pub async fn update_min_cost(&self, cost: f64, source_id: u64) {
        let mut state = self.state.lock().await;
        if cost >= state.min_cost {
            return;
        }
        state.min_cost = cost;
        tracing::info!(
            job_id = self.job_id,
            cost,
            from = source_id,
            "Received better solution cost"
        );
        for vassal in &self.vassals {
            if vassal.vassal_id() == source_id {
                continue;
            }
            match vassal.update_best_sol_cost(cost, self.job_id).await {
                Ok(()) => {
                    tracing::debug!(
                        job_id = self.job_id,
                        vassal_id = vassal.vassal_id(),
                        cost,
                        "Sent best cost to vassal"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = self.job_id,
                        vassal_id = vassal.vassal_id(),
                        error = %e,
                        "Failed to send best cost to vassal"
                    );
                }
            }
        }
    }

    /// Declares completion. Idempotent: terminal actions run exactly once
    /// no matter how many request threads observe the empty belief map.
    async fn done(&self) {
        let min_cost = {
            let mut state = self.state.lock().await;
            if state.done {
                return;
            }
            state.done = true;
            state.min_cost
        };

        self.stats.finished();
        tracing::info!(
            job_id = self.job_id,
            best_cost = min_cost,
            "Computation completed"
        );
        tracing::info!(job_id = self.job_id, stats = %self.stats.report_summary(), "Final job stats");

        if let Some(path) = &self.stats_path {
            if let Err(e) = tokio::fs::write(path, self.stats.report()).await {
                tracing::error!(
                    job_id = self.job_id,
                    path = %path.display(),
                    error = %e,
                    "Error writing stats report"
                );
            }
        }

        self.outcome_tx.send_if_modified(|outcome| {
            if outcome.is_none() {
                *outcome = Some(JobOutcome::Completed {
                    best_cost: min_cost,
                });
                true
            } else {
                false
            }
        });
    }

    /// Marks the job failed because `unreachable` stayed out of contact
    /// past the threshold, and returns the error for the blocked caller.
    /// The process keeps serving other jobs.
    async fn fail_job(&self, unreachable: u64) -> Error {
        let reason = format!(
            "vassal {} unreachable after {} steal attempts",
            unreachable, self.max_failed_steal_attempts
        );
        {
            let mut state = self.state.lock().await;
            state.failed = true;
        }
        self.outcome_tx.send_if_modified(|outcome| {
            if outcome.is_none() {
                *outcome = Some(JobOutcome::Failed {
                    reason: reason.clone(),
                });
                true
            } else {
                false
            }
        });
        Error::JobFailed {
            job_id: self.job_id,
            reason,
        }
    }

    fn job_failed_error(&self) -> Error {
        Error::JobFailed {
            job_id: self.job_id,
            reason: "a vassal became unreachable".to_string(),
        }
    }
}
