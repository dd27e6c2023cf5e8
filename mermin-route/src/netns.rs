// Network namespace helpers for route resolution
//
// Routes, interfaces and sockets are all scoped to a network namespace. The
// router identifies namespaces by the inode of `/proc/<pid>/ns/net` and opens
// its kernel sockets from inside the root namespace.

use std::{
    fs::{self, File},
    os::{fd::OwnedFd, unix::fs::MetadataExt},
    path::{Path, PathBuf},
};

use nix::sched::{CloneFlags, setns};
use tracing::{debug, trace};

use crate::error::RouteError;

/// Namespace file of the calling thread. `setns` only affects this thread.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// PID whose namespace is treated as the root (host) namespace.
pub const ROOT_PID: u32 = 1;

fn netns_path(proc_root: &Path, pid: u32) -> PathBuf {
    proc_root.join(pid.to_string()).join("ns").join("net")
}

/// Returns the network namespace identifier (nsfs inode) of `pid`.
pub fn netns_inode(proc_root: impl AsRef<Path>, pid: u32) -> Result<u32, RouteError> {
    let proc_root = proc_root.as_ref();
    let meta = fs::metadata(netns_path(proc_root, pid))
        .map_err(|e| RouteError::namespace(proc_root, pid, e))?;
    // namespace ids are reported as 32 bit values throughout the agent
    Ok(meta.ino() as u32)
}

/// Runs `f` with the calling thread inside the root network namespace.
///
/// Resources created by `f` (sockets in particular) stay bound to the root
/// namespace after the thread is switched back.
pub fn with_root_ns<F, R>(proc_root: impl AsRef<Path>, f: F) -> Result<R, RouteError>
where
    F: FnOnce() -> Result<R, RouteError>,
{
    NetnsSwitch::for_pid(proc_root, ROOT_PID)?.run(Some("root"), f)
}

/// Network namespace switcher for executing operations in another namespace.
pub struct NetnsSwitch {
    /// File descriptor of the target network namespace
    target: OwnedFd,
    target_ino: u64,
    pid: u32,
}

impl NetnsSwitch {
    /// Opens the network namespace of `pid` under `proc_root`.
    ///
    /// Entering a namespace owned by another process requires CAP_SYS_ADMIN,
    /// and reading its namespace link requires CAP_SYS_PTRACE.
    pub fn for_pid(proc_root: impl AsRef<Path>, pid: u32) -> Result<Self, RouteError> {
        let proc_root = proc_root.as_ref();
        let path = netns_path(proc_root, pid);
        let file = File::open(&path).map_err(|e| RouteError::namespace(proc_root, pid, e))?;
        let target_ino = file
            .metadata()
            .map_err(|e| RouteError::namespace(proc_root, pid, e))?
            .ino();

        debug!(
            event.name = "netns_switch.initialized",
            pid = pid,
            netns = target_ino,
            "network namespace switcher initialized"
        );

        Ok(Self {
            target: file.into(),
            target_ino,
            pid,
        })
    }

    /// Execute closure in the target network namespace.
    ///
    /// Switches into the target namespace, executes the closure, then switches
    /// back. When the thread already lives in the target namespace the closure
    /// runs directly.
    pub fn run<F, R>(&self, context: Option<&str>, f: F) -> Result<R, RouteError>
    where
        F: FnOnce() -> Result<R, RouteError>,
    {
        let current = File::open(THREAD_NETNS).map_err(current_ns_error)?;
        let current_ino = current.metadata().map_err(current_ns_error)?.ino();

        if current_ino == self.target_ino {
            return f();
        }

        setns(&self.target, CloneFlags::CLONE_NEWNET)
            .map_err(|source| self.switch_error(context, source))?;

        if let Some(ctx) = context {
            trace!(
                event.name = "netns_switch.entered",
                context = %ctx,
                netns = self.target_ino,
                "entered network namespace"
            );
        }

        let result = f();

        if let Err(e) = setns(&current, CloneFlags::CLONE_NEWNET) {
            // This is critical - we can't leave the thread in wrong namespace
            panic!("CRITICAL: failed to restore network namespace: {e}");
        }

        if let Some(ctx) = context {
            trace!(
                event.name = "netns_switch.restored",
                context = %ctx,
                netns = current_ino,
                "restored original network namespace"
            );
        }

        result
    }

    fn switch_error(&self, context: Option<&str>, source: nix::Error) -> RouteError {
        let target = match context {
            Some(ctx) => ctx.to_string(),
            None => format!("pid {}", self.pid),
        };
        RouteError::NamespaceSwitch { target, source }
    }
}

fn current_ns_error(source: std::io::Error) -> RouteError {
    RouteError::CurrentNamespace {
        path: PathBuf::from(THREAD_NETNS),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netns_inode_of_self() {
        let ino = netns_inode("/proc", std::process::id()).expect("own netns should be readable");
        assert_ne!(ino, 0);
    }

    #[test]
    fn test_netns_inode_missing_proc_root() {
        let err = netns_inode("/nonexistent/proc", 1).unwrap_err();
        assert!(matches!(err, RouteError::Namespace { pid: 1, .. }));
        assert!(err.to_string().contains("/nonexistent/proc"));
    }

    #[test]
    fn test_run_in_own_namespace_skips_switch() {
        // switching into our own namespace needs no privileges
        let switch = NetnsSwitch::for_pid("/proc", std::process::id()).expect("open own netns");
        let value = switch.run(None, || Ok(42)).expect("closure should run");
        assert_eq!(value, 42);
    }

    #[test]
    fn test_switch_error_names_context() {
        let switch = NetnsSwitch::for_pid("/proc", std::process::id()).expect("open own netns");

        let err = switch.switch_error(Some("root"), nix::Error::EPERM);
        assert!(matches!(&err, RouteError::NamespaceSwitch { target, .. } if target == "root"));
        assert!(err.to_string().starts_with("failed to switch to root netns"));

        let err = switch.switch_error(None, nix::Error::EPERM);
        let pid = std::process::id();
        assert!(err.to_string().starts_with(&format!("failed to switch to pid {pid} netns")));
    }

    #[test]
    fn test_current_ns_error_names_thread_namespace() {
        let err = current_ns_error(std::io::Error::from_raw_os_error(libc::ENOENT));
        let msg = err.to_string();
        assert!(msg.contains("calling thread"));
        assert!(msg.contains(THREAD_NETNS));
        assert!(!msg.contains("pid 0"));
    }

    #[test]
    fn test_run_propagates_closure_error() {
        let switch = NetnsSwitch::for_pid("/proc", std::process::id()).expect("open own netns");
        let result: Result<(), _> = switch.run(Some("test"), || {
            Err(RouteError::socket("ioctl", std::io::Error::from_raw_os_error(libc::EMFILE)))
        });
        assert!(matches!(result, Err(RouteError::Socket { kind: "ioctl", .. })));
    }
}
