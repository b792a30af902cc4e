use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::proto::{NodeData, ProblemData};
use crate::search::node::{Problem, SearchNode};
use crate::search::tsp::{TspNode, TspProblem};

/// Reconstructs a node of one concrete type from its wire payload, given the
/// problem instance already resident on the receiving side.
pub type NodeFactory = fn(&[u8], &dyn Problem) -> Result<Box<dyn SearchNode>>;

/// Reconstructs a problem instance from its wire payload.
pub type ProblemFactory = fn(&[u8]) -> Result<Arc<dyn Problem>>;

/// Maps type tags to deserialization factories.
///
/// Every node and problem travels as a (tag, payload) pair; the receiving
/// side looks the tag up here instead of trusting the sender with a class
/// name. An unknown tag fails the specific request, nothing else.
pub struct TypeRegistry {
    node_factories: HashMap<&'static str, NodeFactory>,
    problem_factories: HashMap<&'static str, ProblemFactory>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            node_factories: HashMap::new(),
            problem_factories: HashMap::new(),
        }
    }

    /// A registry with the problem types this crate ships.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_problem(TspProblem::TYPE_TAG, |bytes| {
            Ok(Arc::new(TspProblem::from_bytes(bytes)?) as Arc<dyn Problem>)
        });
        registry.register_node(TspNode::TYPE_TAG, |bytes, problem| {
            let problem = problem
                .as_any()
                .downcast_ref::<TspProblem>()
                .ok_or_else(|| {
                    Error::Decode("tsp node arrived for a non-tsp problem".to_string())
                })?;
            Ok(Box::new(TspNode::from_bytes(bytes, problem)?) as Box<dyn SearchNode>)
        });
        registry
    }

    pub fn register_node(&mut self, tag: &'static str, factory: NodeFactory) {
        self.node_factories.insert(tag, factory);
    }

    pub fn register_problem(&mut self, tag: &'static str, factory: ProblemFactory) {
        self.problem_factories.insert(tag, factory);
    }

    pub fn decode_node(
        &self,
        data: &NodeData,
        problem: &dyn Problem,
    ) -> Result<Box<dyn SearchNode>> {
        let factory = self
            .node_factories
            .get(data.node_type.as_str())
            .ok_or_else(|| Error::UnknownNodeType(data.node_type.clone()))?;
        factory(&data.payload, problem)
    }

    pub fn decode_nodes(
        &self,
        data: &[NodeData],
        problem: &dyn Problem,
    ) -> Result<Vec<Box<dyn SearchNode>>> {
        data.iter()
            .map(|d| self.decode_node(d, problem))
            .collect()
    }

    pub fn decode_problem(&self, data: &ProblemData) -> Result<Arc<dyn Problem>> {
        let factory = self
            .problem_factories
            .get(data.problem_type.as_str())
            .ok_or_else(|| Error::UnknownProblemType(data.problem_type.clone()))?;
        factory(&data.payload)
    }

    pub fn encode_node(node: &dyn SearchNode) -> NodeData {
        NodeData {
            node_type: node.node_type().to_string(),
            payload: node.to_bytes(),
        }
    }

    pub fn encode_problem(problem: &dyn Problem) -> ProblemData {
        ProblemData {
            problem_type: problem.problem_type().to_string(),
            payload: problem.to_bytes(),
        }
    }
}
