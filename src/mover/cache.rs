// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Record of which holder pods currently have a clone in the host namespace.
//!
//! The cache is not synchronized itself. The mover keeps it inside its network mutex, so
//! it can only be read or changed while host interfaces are locked.

use std::collections::HashMap;

/// What the mover created for one holder pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovedInterfaceInfo {
    /// Name of the clone in the host network namespace
    pub cloned_interface_name: String,
}

/// Holder pod name to moved interface.
#[derive(Clone, Debug, Default)]
pub struct MovedInterfaceCache {
    entries: HashMap<String, MovedInterfaceInfo>,
}

impl MovedInterfaceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exists(&self, holder_pod: &str) -> bool {
        self.entries.contains_key(holder_pod)
    }

    #[must_use]
    pub fn get(&self, holder_pod: &str) -> Option<&MovedInterfaceInfo> {
        self.entries.get(holder_pod)
    }

    /// Record (or replace) the clone for `holder_pod`.
    pub fn add(&mut self, holder_pod: &str, info: MovedInterfaceInfo) {
        self.entries.insert(holder_pod.to_string(), info);
    }

    pub fn remove(&mut self, holder_pod: &str) -> Option<MovedInterfaceInfo> {
        self.entries.remove(holder_pod)
    }

    /// Snapshot of every entry.
    #[must_use]
    pub fn as_map(&self) -> HashMap<String, MovedInterfaceInfo> {
        self.entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
