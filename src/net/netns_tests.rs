// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `netns.rs`
//!
//! Joining a namespace needs `CAP_SYS_ADMIN`, so these tests stick to the filesystem side.

#[cfg(test)]
mod tests {
    use super::super::{LinuxNetNs, LinuxNetNsProvider};
    use crate::net::{NetError, NetNs, NetNsProvider};
    use std::fs;

    #[test]
    fn test_namespace_paths_lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cni-b"), b"").unwrap();
        fs::write(dir.path().join("cni-a"), b"").unwrap();
        fs::create_dir(dir.path().join("not-a-namespace")).unwrap();

        let provider = LinuxNetNsProvider::new(dir.path());
        let paths = provider.namespace_paths().unwrap();

        assert_eq!(
            paths,
            vec![dir.path().join("cni-a"), dir.path().join("cni-b")],
            "directories must be skipped and files returned in order"
        );
    }

    #[test]
    fn test_namespace_paths_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LinuxNetNsProvider::new(dir.path().join("missing"));

        let err = provider.namespace_paths().unwrap_err();
        assert!(matches!(err, NetError::Namespace { .. }), "got {err:?}");
    }

    #[test]
    fn test_open_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cni-1234");
        fs::write(&path, b"").unwrap();

        let ns = LinuxNetNs::open(&path).unwrap();
        assert_eq!(ns.path(), path.as_path());
        assert!(ns.fd() >= 0);
    }

    #[test]
    fn test_open_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LinuxNetNs::open(&dir.path().join("gone")).unwrap_err();
        assert!(err.to_string().contains("open failed"), "got {err}");
    }

    #[tokio::test]
    async fn test_enter_non_namespace_file_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain-file");
        fs::write(&path, b"").unwrap();

        let ns = LinuxNetNs::open(&path).unwrap();
        let result = ns.enter(|| async { Ok(42) }).await;

        let err = result.unwrap_err();
        assert!(
            matches!(err, NetError::Namespace { operation: "setns", .. }),
            "setns on a regular file must fail cleanly, got {err:?}"
        );
    }

    #[test]
    fn test_default_provider_uses_var_run_netns() {
        let provider = LinuxNetNsProvider::default();
        assert_eq!(provider.ns_dir(), std::path::Path::new("/var/run/netns"));
    }
}
