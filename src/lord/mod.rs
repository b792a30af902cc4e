pub mod coordinator;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod starter;
pub mod stats;

pub use coordinator::{JobCoordinator, JobOutcome};
pub use proxy::{VassalLink, VassalProxy};
pub use registry::{JobRegistry, VassalRegistry};
pub use server::LordServer;
pub use stats::LordJobStats;
