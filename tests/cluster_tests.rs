
use std::sync::Arc;
use std::time::Duration;

use bnb_cluster::config::LordConfig;
use bnb_cluster::lord::JobOutcome;
use bnb_cluster::search::tsp::{City, TspNode, TspProblem};

use test_harness::{optimal_tour_cost, scattered_problem, TestCluster};

async fn run_to_outcome(cluster: &TestCluster, problem: Arc<TspProblem>, quorum: usize) -> JobOutcome {
    let job_id = cluster
        .lord
        .run_job_when_enough_vassals(Box::new(TspNode::root()), problem, f64::MAX, quorum)
        .await
        .expect("job launches");
    tokio::time::timeout(
        Duration::from_secs(60),
        cluster.lord.wait_for_outcome(job_id),
    )
    .await
    .expect("job reaches a terminal state in time")
    .expect("coordinator stays alive")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_vassals_find_the_optimal_tour() {
    let cluster = TestCluster::start(3, 1).await;
    let problem = scattered_problem();
    let expected = optimal_tour_cost(&problem);

    match run_to_outcome(&cluster, problem, 3).await {
        JobOutcome::Completed { best_cost } => {
            assert!(
                (best_cost - expected).abs() < 1e-6,
                "got {} expected {}",
                best_cost,
                expected
            );
        }
        JobOutcome::Failed { reason } => panic!("job failed: {}", reason),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_single_vassal_with_two_slots_finds_the_optimum() {
    let cluster = TestCluster::start(1, 2).await;
    let problem = Arc::new(TspProblem::new(vec![
        City::new(0, 0, 0),
        City::new(12, 3, 1),
        City::new(8, 14, 2),
        City::new(2, 9, 3),
        City::new(15, 11, 4),
        City::new(6, 1, 5),
    ]));
    let expected = optimal_tour_cost(&problem);

    match run_to_outcome(&cluster, problem, 1).await {
        JobOutcome::Completed { best_cost } => {
            assert!((best_cost - expected).abs() < 1e-6);
        }
        JobOutcome::Failed { reason } => panic!("job failed: {}", reason),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_tight_initial_bound_still_completes() {
    let cluster = TestCluster::start(2, 1).await;
    let problem = scattered_problem();
    let expected = optimal_tour_cost(&problem);

    // a bound just above the optimum prunes almost everything
    let job_id = cluster
        .lord
        .run_job_when_enough_vassals(
            Box::new(TspNode::root()),
            problem,
            expected + 1.0,
            2,
        )
        .await
        .expect("job launches");
    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        cluster.lord.wait_for_outcome(job_id),
    )
    .await
    .expect("job reaches a terminal state in time")
    .expect("coordinator stays alive");

    match outcome {
        JobOutcome::Completed { best_cost } => {
            assert!((best_cost - expected).abs() < 1e-6);
        }
        JobOutcome::Failed { reason } => panic!("job failed: {}", reason),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn an_unreachable_vassal_fails_the_job_but_not_the_lord() {
    let config = LordConfig::default().with_rpc_timeout_ms(500);
    let cluster = TestCluster::start_with_config(2, 1, config).await;
    // vassal 2 registered but is gone before the job starts
    cluster.kill_vassal(1);

    let problem = scattered_problem();
    match run_to_outcome(&cluster, problem, 2).await {
        JobOutcome::Failed { reason } => {
            assert!(reason.contains("unreachable"), "reason: {}", reason);
        }
        JobOutcome::Completed { .. } => panic!("job should have failed"),
    }

    // the lord keeps serving: registry lookups still work
    assert_eq!(cluster.lord.vassals().count().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn the_stats_report_is_written_at_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats_path = dir.path().join("job-stats.log");
    let config = LordConfig::default().with_stats_path(stats_path.clone());
    let cluster = TestCluster::start_with_config(2, 1, config).await;

    let problem = scattered_problem();
    match run_to_outcome(&cluster, problem, 2).await {
        JobOutcome::Completed { .. } => {}
        JobOutcome::Failed { reason } => panic!("job failed: {}", reason),
    }

    let report = std::fs::read_to_string(&stats_path).expect("report exists");
    assert!(report.contains("steals served"), "report: {}", report);
}
