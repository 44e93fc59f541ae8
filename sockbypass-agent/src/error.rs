use thiserror::Error;

/// Errors that can occur in the agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("BPF error: {0}")]
    Ebpf(#[from] sockbypass_ebpf::EbpfError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
