pub mod config;
pub mod error;
pub mod lord;
pub mod search;
pub mod vassal;

pub use error::{Error, Result};

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("bnb");
}
