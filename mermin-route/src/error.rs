// Error types for mermin-route

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors surfaced while constructing route resolution components.
///
/// Per-lookup failures never show up here: they are absorbed into a miss and
/// a counter increment.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The namespace inode of a process could not be read.
    #[error("could not get net ns for pid {pid} under {proc_root}: {source}")]
    Namespace {
        proc_root: PathBuf,
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// The calling thread's own namespace could not be opened.
    #[error("could not open the calling thread's net ns at {path}: {source}")]
    CurrentNamespace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Switching the calling thread into a network namespace failed.
    #[error("failed to switch to {target} netns: {source}")]
    NamespaceSwitch {
        target: String,
        #[source]
        source: nix::Error,
    },

    /// A kernel socket needed by the router could not be opened.
    #[error("failed to open {kind} socket: {source}")]
    Socket {
        kind: &'static str,
        #[source]
        source: io::Error,
    },
}

impl RouteError {
    pub fn namespace(proc_root: impl Into<PathBuf>, pid: u32, source: io::Error) -> Self {
        Self::Namespace {
            proc_root: proc_root.into(),
            pid,
            source,
        }
    }

    pub fn socket(kind: &'static str, source: impl Into<io::Error>) -> Self {
        Self::Socket {
            kind,
            source: source.into(),
        }
    }
}
