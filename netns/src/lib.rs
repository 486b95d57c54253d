//! Namespace executor (spec.md §4.B): scoped acquisition of a network
//! namespace with guaranteed return to the original namespace on every
//! exit path, including the closure panicking.
//!
//! `setns(2)` affects only the calling OS thread, so this crate assumes
//! the synchronous, one-thread-per-worker model spec.md §5 describes (no
//! cooperative yielding inside a driver step) — the same assumption the
//! teacher's `netns_ng::exec_netns!` macro makes.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use log::debug;

const CURRENT_NS_PATH: &str = "/proc/self/ns/net";

/// An opaque token bound to a kernel network-namespace descriptor.
pub struct NetworkNamespace {
    file: File,
}

impl NetworkNamespace {
    /// The namespace the calling thread is in right now.
    pub fn current() -> io::Result<Self> {
        Ok(Self {
            file: File::open(CURRENT_NS_PATH)?,
        })
    }

    /// Opens the namespace bound at `path` (e.g. a CNI `netns` argument),
    /// or `None` if nothing is mounted there.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        match File::open(path.as_ref()) {
            Ok(file) => Ok(Some(Self { file })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Constructs a handle from an already-open namespace fd (used when
    /// the host side of a veth pair is moved by descriptor, spec.md §4.E
    /// step 2).
    pub fn from_owned_fd(file: File) -> Self {
        Self { file }
    }

    /// `(dev, ino)` — the inode-level identity of the namespace, stable
    /// across bind mounts of the same underlying namespace.
    pub fn unique_id(&self) -> io::Result<(u64, u64)> {
        let meta = self.file.metadata()?;
        Ok((meta.dev(), meta.ino()))
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn enter(&self) -> io::Result<()> {
        let ret = unsafe { libc::setns(self.fd(), libc::CLONE_NEWNET) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Serializes namespace entries process-wide (spec.md §4.B / §5: "prevent
/// concurrent namespace entries from interleaving on the same worker").
/// `setns(2)` is per-thread, but since every worker in this model enters
/// namespaces synchronously and sequentially within a single `Setup`/
/// `Teardown`/`Check` call, a single process-wide mutex held for the
/// closure's duration is enough: nested entries are forbidden (spec.md
/// §5), so no worker can need the lock twice concurrently.
static NS_GUARD: Mutex<()> = Mutex::new(());

/// Enters `ns`, runs `f`, and restores the original namespace before
/// returning — on success, on `f` returning an error, and on `f`
/// panicking.
pub fn with_namespace<T>(ns: &NetworkNamespace, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    let _guard = NS_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let original = NetworkNamespace::current().context("netns: read current namespace")?;
    ns.enter().context("netns: enter target namespace")?;
    debug!("entered target network namespace");

    let result = catch_unwind(AssertUnwindSafe(f));

    let restore = original.enter().context("netns: restore original namespace");
    debug!("restored original network namespace");

    match result {
        Ok(Ok(value)) => {
            restore?;
            Ok(value)
        }
        Ok(Err(e)) => {
            let _ = restore;
            Err(e)
        }
        Err(panic) => {
            let _ = restore;
            std::panic::resume_unwind(panic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_namespace_round_trips() {
        let ns = NetworkNamespace::current().expect("read current ns");
        let id = ns.unique_id().expect("stat current ns");
        assert!(id.1 > 0, "namespace inode should be nonzero");
    }

    #[test]
    fn with_namespace_restores_on_error() {
        let ns = NetworkNamespace::current().expect("read current ns");
        let before = NetworkNamespace::current().unwrap().unique_id().unwrap();

        let result: anyhow::Result<()> = with_namespace(&ns, || anyhow::bail!("boom"));
        assert!(result.is_err());

        let after = NetworkNamespace::current().unwrap().unique_id().unwrap();
        assert_eq!(before, after);
    }
}
