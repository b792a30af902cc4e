use std::collections::VecDeque;

use crate::search::{Problem, SearchNode};

/// Expands the root breadth-first until the frontier holds at least
/// `min_nodes` unevaluated nodes, or the tree is exhausted. Used once per
/// job to build the initial assignment plus the lord-side steal reserve.
pub fn build_frontier(
    problem: &dyn Problem,
    best_cost: f64,
    root: Box<dyn SearchNode>,
    min_nodes: usize,
) -> Vec<Box<dyn SearchNode>> {
    let mut frontier: VecDeque<Box<dyn SearchNode>> = VecDeque::new();
    frontier.push_back(root);
    while frontier.len() < min_nodes {
        let Some(mut node) = frontier.pop_front() else {
            break;
        };
        node.evaluate(problem, best_cost);
        if node.is_solution() {
            tracing::info!(cost = node.cost(), "Solution found during root expansion");
            continue;
        }
        while let Some(child) = node.next_child() {
            frontier.push_back(child);
        }
    }
    frontier.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tsp::{City, TspNode, TspProblem};

    fn line_problem(n: i32) -> TspProblem {
        TspProblem::new((0..n).map(|i| City::new(i, 0, i)).collect())
    }

    #[test]
    fn expands_until_enough_nodes() {
        let problem = line_problem(6);
        let frontier = build_frontier(&problem, f64::MAX, Box::new(TspNode::root()), 5);
        assert!(frontier.len() >= 5);
        for node in &frontier {
            assert!(!node.is_evaluated());
        }
    }

    #[test]
    fn single_node_request_returns_root_unevaluated() {
        let problem = line_problem(6);
        let frontier = build_frontier(&problem, f64::MAX, Box::new(TspNode::root()), 1);
        assert_eq!(frontier.len(), 1);
        assert!(!frontier[0].is_evaluated());
    }

    #[test]
    fn exhausted_tree_returns_what_exists() {
        // two cities: the root's single child is the only frontier node
        let problem = line_problem(2);
        let frontier = build_frontier(&problem, f64::MAX, Box::new(TspNode::root()), 50);
        assert!(frontier.len() < 50);
    }
}
