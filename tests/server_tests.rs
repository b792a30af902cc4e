mod mock_vassal;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use bnb_cluster::config::LordConfig;
use bnb_cluster::error::Error;
use bnb_cluster::lord::{LordServer, VassalLink};
use bnb_cluster::search::tsp::TspNode;
use bnb_cluster::search::TypeRegistry;

use mock_vassal::{line_problem, MockVassal};

fn server() -> Arc<LordServer> {
    LordServer::new(LordConfig::default(), TypeRegistry::with_builtin())
}

async fn register_mocks(server: &LordServer, ids: &[u64]) -> Vec<Arc<MockVassal>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mocks = Vec::new();
    for &id in ids {
        let mock = MockVassal::new(id, log.clone());
        server
            .vassals()
            .register(mock.clone() as Arc<dyn VassalLink>)
            .await;
        mocks.push(mock);
    }
    mocks
}

#[tokio::test]
async fn launch_hands_one_node_to_each_vassal_and_keeps_the_spares() {
    let server = server();
    let mocks = register_mocks(&server, &[1, 2, 3]).await;

    // a 6-city line: the root expands into exactly 5 frontier nodes
    let problem = line_problem(6);
    let vassals = server.vassals().first_n(3).await;
    let job_id = server
        .run_job(Box::new(TspNode::root()), problem, f64::MAX, vassals, 2)
        .await
        .unwrap();

    let coordinator = server.jobs().get(job_id).await.unwrap();
    assert_eq!(coordinator.frontier_len().await, 2);
    for mock in &mocks {
        let started = mock.started.lock().await;
        assert_eq!(started.len(), 1);
        let (node_count, started_job, num_slots) = started[0];
        assert_eq!(node_count, 1);
        assert_eq!(started_job, job_id);
        assert_eq!(num_slots, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_launch_waits_for_the_registration_quorum() {
    let server = server();
    register_mocks(&server, &[1, 2]).await;

    let launch = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .run_job_when_enough_vassals(
                    Box::new(TspNode::root()),
                    line_problem(6),
                    f64::MAX,
                    3,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!launch.is_finished(), "must wait for the third vassal");

    register_mocks(&server, &[3]).await;
    let job_id = tokio::time::timeout(Duration::from_secs(5), launch)
        .await
        .expect("launch resolves after quorum")
        .unwrap()
        .unwrap();
    assert!(server.jobs().get(job_id).await.is_ok());
}

#[tokio::test]
async fn duplicate_registration_is_ignored() {
    let server = server();
    register_mocks(&server, &[5]).await;
    assert_eq!(server.vassals().count().await, 1);

    register_mocks(&server, &[5]).await;
    assert_eq!(server.vassals().count().await, 1);
}

#[tokio::test]
async fn unknown_ids_surface_as_typed_errors() {
    let server = server();
    register_mocks(&server, &[1]).await;

    let err = server.ask_for_work(99, 1, f64::MAX).await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(99)));

    let vassals = server.vassals().first_n(1).await;
    let job_id = server
        .run_job(Box::new(TspNode::root()), line_problem(6), f64::MAX, vassals, 0)
        .await
        .unwrap();

    let err = server.ask_for_work(job_id, 42, f64::MAX).await.unwrap_err();
    assert!(matches!(err, Error::VassalNotFound(42)));

    let err = server
        .send_best_sol_cost(10.0, job_id, 42)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VassalNotFound(42)));

    let err = server.send_best_sol_cost(10.0, 77, 1).await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(77)));
}

#[tokio::test]
async fn reported_best_cost_is_folded_in_before_serving_work() {
    let server = server();
    let mocks = register_mocks(&server, &[1, 2]).await;
    let vassals = server.vassals().first_n(2).await;
    let job_id = server
        .run_job(Box::new(TspNode::root()), line_problem(6), f64::MAX, vassals, 2)
        .await
        .unwrap();

    let nodes = server.ask_for_work(job_id, 1, 42.0).await.unwrap();
    assert!(!nodes.is_empty());

    let coordinator = server.jobs().get(job_id).await.unwrap();
    assert_eq!(coordinator.best_cost().await, 42.0);
    // the reporter itself is skipped by the broadcast
    assert!(mocks[0].bound_updates.lock().await.is_empty());
    assert_eq!(*mocks[1].bound_updates.lock().await, vec![42.0]);
}
