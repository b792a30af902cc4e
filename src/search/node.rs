use std::any::Any;
use std::fmt;

/// A complete solution produced by the search.
pub trait Solution: Send + Sync + fmt::Debug + fmt::Display {
    fn cost(&self) -> f64;
}

/// An immutable description of one optimization instance, shared by every
/// node of a job. Shipped to each vassal once at job start.
pub trait Problem: Send + Sync + fmt::Debug {
    /// Type tag used to pick the deserialization factory on the far side.
    fn problem_type(&self) -> &'static str;

    fn to_bytes(&self) -> Vec<u8>;

    /// Downcast hook for node implementations that need the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// One unit of search-tree work: a partial solution rooting a subtree.
///
/// `evaluate` runs the node's bounding and branching step against the given
/// pruning bound. Children become observable through `next_child` /
/// `has_next_child` in order of preference, most preferred first. That order
/// is part of every implementation's contract: it encodes which subtree a
/// depth-first worker descends into next.
///
/// A node never re-evaluates itself once evaluated; implementations are
/// responsible for making `evaluate` a no-op the second time.
pub trait SearchNode: Send + Sync + fmt::Debug {
    /// Type tag used to pick the deserialization factory on the far side.
    fn node_type(&self) -> &'static str;

    fn evaluate(&mut self, problem: &dyn Problem, bound: f64);

    fn is_evaluated(&self) -> bool;

    fn has_next_child(&self) -> bool;

    /// Pops the next most-preferred child, if any remain.
    fn next_child(&mut self) -> Option<Box<dyn SearchNode>>;

    fn is_solution(&self) -> bool;

    /// The node's current bound, or the solution cost once `is_solution`.
    fn cost(&self) -> f64;

    /// Defined only when `is_solution` holds.
    fn solution(&self) -> Option<Box<dyn Solution>>;

    fn to_bytes(&self) -> Vec<u8>;
}
