//! Top-level daemon errors and the distinguishable exit codes spec §7
//! requires for a failed startup self-check.

use thiserror::Error;

/// Result alias used throughout this binary.
pub type Result<T> = std::result::Result<T, TeecdError>;

/// Failures that can abort `teecd` startup before it ever begins
/// serving requests.
#[derive(Debug, Error)]
pub enum TeecdError {
    /// The configuration file could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Config(#[from] anyhow::Error),
    /// Opening the TEE device or negotiating its driver version failed.
    #[error("driver probe failed: {0}")]
    Driver(#[from] tee_broker::BrokerError),
    /// Registering one of the host agent channels failed.
    #[error("agent registration failed: {0}")]
    Agent(#[from] tee_agent::AgentError),
    /// Setting up the POSIX proxy's shared-memory tasklets failed.
    #[error("posix proxy setup failed: {0}")]
    Proxy(#[from] tee_xtasklet::QueueError),
    /// Allocating the anonymous shared-memory region backing a tasklet
    /// failed.
    #[error("tasklet memory allocation failed: {0}")]
    TaskletMemory(#[from] std::io::Error),
}

impl TeecdError {
    /// A distinguishable non-zero process exit status, so an init
    /// system or operator can tell a config mistake from a hardware/
    /// driver problem without parsing log text.
    pub fn exit_code(&self) -> i32 {
        match self {
            TeecdError::Config(_) => 1,
            TeecdError::Driver(_) => 2,
            TeecdError::Agent(_) => 3,
            TeecdError::Proxy(_) => 4,
            TeecdError::TaskletMemory(_) => 5,
        }
    }
}
