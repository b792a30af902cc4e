pub mod node;
pub mod registry;
pub mod tsp;

pub use node::{Problem, SearchNode, Solution};
pub use registry::TypeRegistry;
