// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Linux network namespaces backed by namespace files.
//!
//! Entering a namespace spawns a dedicated OS thread, joins the namespace with
//! `setns(CLONE_NEWNET)` on that thread and drives the closure's future on a
//! single-threaded tokio runtime owned by the thread. The thread exits afterwards, so no
//! thread ever returns to a pool with a foreign namespace attached.

use std::fs::File;
use std::future::Future;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sched::{setns, CloneFlags};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::{NetError, NetNs, NetNsProvider};
use crate::constants::{CURRENT_NETNS_PATH, DEFAULT_NETNS_DIR};

/// An open network namespace file.
#[derive(Clone, Debug)]
pub struct LinuxNetNs {
    path: PathBuf,
    file: Arc<File>,
}

impl LinuxNetNs {
    /// Open the namespace bound at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Namespace`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, NetError> {
        let file = File::open(path).map_err(|source| NetError::Namespace {
            path: path.to_path_buf(),
            operation: "open",
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
        })
    }

    fn thread_name(&self) -> String {
        let short = self
            .path
            .file_name()
            .map_or_else(|| self.path.to_string_lossy(), |n| n.to_string_lossy());
        format!("netns-{short}")
    }
}

impl NetNs for LinuxNetNs {
    fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn enter<F, Fut, T>(&self, f: F) -> impl Future<Output = Result<T, NetError>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, NetError>> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let file = Arc::clone(&self.file);
        let thread_name = self.thread_name();

        async move {
            let (tx, rx) = oneshot::channel();
            let worker_path = path.clone();

            let spawned = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    let result = run_in_namespace(&worker_path, &file, f);
                    // The receiver only goes away if the caller was dropped.
                    let _ = tx.send(result);
                });

            if let Err(source) = spawned {
                return Err(NetError::Namespace {
                    path,
                    operation: "spawn namespace thread",
                    source,
                });
            }

            // A panic inside `f` drops the sender and surfaces here.
            rx.await
                .map_err(|_| NetError::NamespaceWorker { path: path.clone() })?
        }
    }
}

fn run_in_namespace<F, Fut, T>(path: &Path, file: &File, f: F) -> Result<T, NetError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, NetError>>,
{
    setns(file, CloneFlags::CLONE_NEWNET).map_err(|errno| NetError::Namespace {
        path: path.to_path_buf(),
        operation: "setns",
        source: std::io::Error::from(errno),
    })?;
    trace!(netns = %path.display(), "entered network namespace");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .map_err(|source| NetError::Namespace {
            path: path.to_path_buf(),
            operation: "build namespace runtime",
            source,
        })?;

    runtime.block_on(f())
}

/// Finds namespaces under a namespace directory such as `/var/run/netns`.
#[derive(Clone, Debug)]
pub struct LinuxNetNsProvider {
    ns_dir: PathBuf,
}

impl LinuxNetNsProvider {
    #[must_use]
    pub fn new(ns_dir: impl Into<PathBuf>) -> Self {
        Self {
            ns_dir: ns_dir.into(),
        }
    }

    #[must_use]
    pub fn ns_dir(&self) -> &Path {
        &self.ns_dir
    }
}

impl Default for LinuxNetNsProvider {
    fn default() -> Self {
        Self::new(DEFAULT_NETNS_DIR)
    }
}

impl NetNsProvider for LinuxNetNsProvider {
    type Ns = LinuxNetNs;

    fn current_namespace(&self) -> Result<LinuxNetNs, NetError> {
        LinuxNetNs::open(Path::new(CURRENT_NETNS_PATH))
    }

    fn namespace_by_path(&self, path: &Path) -> Result<LinuxNetNs, NetError> {
        LinuxNetNs::open(path)
    }

    fn namespace_paths(&self) -> Result<Vec<PathBuf>, NetError> {
        let io_err = |source| NetError::Namespace {
            path: self.ns_dir.clone(),
            operation: "read namespace directory",
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.ns_dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            // Bind mounts of nsfs show up as regular files; skip directories and the like.
            if entry.file_type().map_or(false, |t| t.is_file()) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        debug!(dir = %self.ns_dir.display(), count = paths.len(), "listed network namespaces");
        Ok(paths)
    }
}

#[cfg(test)]
#[path = "netns_tests.rs"]
mod netns_tests;
