mod mock_vassal;

use std::any::Any;

use bnb_cluster::error::Error;
use bnb_cluster::proto::{NodeData, ProblemData};
use bnb_cluster::search::tsp::{City, TspProblem};
use bnb_cluster::search::{Problem, TypeRegistry};

use mock_vassal::{encoded_tour, line_problem, tour_node};

#[test]
fn node_round_trips_through_the_registry() {
    let registry = TypeRegistry::with_builtin();
    let problem = line_problem(6);
    let node = tour_node(&problem, &[0, 3, 1]);

    let data = TypeRegistry::encode_node(node.as_ref());
    assert_eq!(data.node_type, "tsp");

    let decoded = registry.decode_node(&data, problem.as_ref()).unwrap();
    assert_eq!(decoded.to_bytes(), node.to_bytes());
}

#[test]
fn problem_round_trips_through_the_registry() {
    let registry = TypeRegistry::with_builtin();
    let problem = TspProblem::new(vec![
        City::new(10, 20, 0),
        City::new(-5, 3, 1),
        City::new(0, 0, 2),
    ]);

    let data = TypeRegistry::encode_problem(&problem);
    assert_eq!(data.problem_type, "tsp");

    let decoded = registry.decode_problem(&data).unwrap();
    assert_eq!(decoded.to_bytes(), problem.to_bytes());
}

#[test]
fn unknown_node_type_fails_the_request() {
    let registry = TypeRegistry::with_builtin();
    let problem = line_problem(4);
    let data = NodeData {
        node_type: "graph-coloring".to_string(),
        payload: Vec::new(),
    };
    let err = registry.decode_node(&data, problem.as_ref()).unwrap_err();
    assert!(matches!(err, Error::UnknownNodeType(tag) if tag == "graph-coloring"));
}

#[test]
fn unknown_problem_type_fails_the_request() {
    let registry = TypeRegistry::with_builtin();
    let data = ProblemData {
        problem_type: "vrp".to_string(),
        payload: Vec::new(),
    };
    let err = registry.decode_problem(&data).unwrap_err();
    assert!(matches!(err, Error::UnknownProblemType(tag) if tag == "vrp"));
}

#[test]
fn corrupt_payload_fails_the_request() {
    let registry = TypeRegistry::with_builtin();
    let problem = line_problem(4);
    let data = NodeData {
        node_type: "tsp".to_string(),
        payload: vec![0xff, 0x01],
    };
    assert!(matches!(
        registry.decode_node(&data, problem.as_ref()),
        Err(Error::Decode(_))
    ));

    let data = ProblemData {
        problem_type: "tsp".to_string(),
        payload: vec![0x00],
    };
    assert!(matches!(
        registry.decode_problem(&data),
        Err(Error::Decode(_))
    ));
}

#[derive(Debug)]
struct OtherProblem;

impl Problem for OtherProblem {
    fn problem_type(&self) -> &'static str {
        "other"
    }

    fn to_bytes(&self) -> Vec<u8> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn node_for_the_wrong_problem_type_fails_the_request() {
    let registry = TypeRegistry::with_builtin();
    let data = encoded_tour(&[0, 1]);
    let err = registry.decode_node(&data, &OtherProblem).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn custom_factories_can_be_registered() {
    let mut registry = TypeRegistry::new();
    registry.register_problem("tsp", |bytes| {
        Ok(std::sync::Arc::new(TspProblem::from_bytes(bytes)?) as std::sync::Arc<dyn Problem>)
    });
    let problem = line_problem(3);
    let data = TypeRegistry::encode_problem(problem.as_ref());
    assert!(registry.decode_problem(&data).is_ok());
    // nodes were not registered on this instance
    assert!(registry
        .decode_node(&encoded_tour(&[0, 1]), problem.as_ref())
        .is_err());
}
