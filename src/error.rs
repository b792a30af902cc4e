use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Job not found: {0}")]
    JobNotFound(u64),

    #[error("Vassal not found: {0}")]
    VassalNotFound(u64),

    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: u64, reason: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown problem type: {0}")]
    UnknownProblemType(String),

    #[error("Malformed payload: {0}")]
    Decode(String),

    #[error("RPC to vassal {vassal_id} timed out after {timeout_ms}ms")]
    RpcTimeout { vassal_id: u64, timeout_ms: u64 },

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::JobNotFound(id) => tonic::Status::not_found(format!("job {}", id)),
            Error::VassalNotFound(id) => tonic::Status::not_found(format!("vassal {}", id)),
            Error::JobFailed { job_id, reason } => {
                tonic::Status::aborted(format!("job {} failed: {}", job_id, reason))
            }
            Error::UnknownNodeType(t) | Error::UnknownProblemType(t) => {
                tonic::Status::invalid_argument(format!("unknown type tag {:?}", t))
            }
            Error::Decode(msg) => tonic::Status::invalid_argument(msg),
            Error::Grpc(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
