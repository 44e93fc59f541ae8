// eBPF is Linux-only. This crate does not compile for other targets.
#![cfg(target_os = "linux")]
// Unsafe is required in one narrow, documented site:
//   - sys.rs: libc setrlimit / statfs / mount FFI calls
// All other unsafe is denied.
#![deny(unsafe_code)]

pub mod maps;
pub mod program;
pub mod sys;

pub use maps::{DebugControl, ProxyMapReader};
pub use program::{BypassProgram, LoadOptions};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EbpfError {
    #[error("failed to load BPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("program '{0}' not found in BPF object")]
    ProgramNotFound(&'static str),

    #[error("map '{0}' not found in BPF object")]
    MapNotFound(&'static str),

    #[error("program '{name}' has the wrong type: {source}")]
    ProgramType {
        name: &'static str,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("failed to load program '{name}' into kernel: {source}")]
    ProgramLoad {
        name: &'static str,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("failed to attach program '{name}': {source}")]
    Attach {
        name: &'static str,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("map error: {0}")]
    Map(#[from] aya::maps::MapError),

    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to raise RLIMIT_MEMLOCK: {0}")]
    Rlimit(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EbpfError>;
