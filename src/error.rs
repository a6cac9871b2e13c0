use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No job available")]
    NoJobAvailable,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {id} not assigned to worker {worker:?}")]
    JobNotAssigned { id: String, worker: String },

    #[error("Worker id cannot be empty")]
    InvalidWorker,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Partition source error: {0}")]
    PartitionSource(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
