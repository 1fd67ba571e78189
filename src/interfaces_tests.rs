// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `interfaces.rs`

#[cfg(test)]
mod tests {
    use super::super::InterfaceEngine;
    use crate::constants::MOVED_INTERFACE_PREFIX;
    use crate::net::mock::{
        addr, HolderFixture, MockExecutor, MockNetNsProvider, MOCK_HOST_NS,
    };
    use crate::net::{MacAddr, NetError, NetExecutor, NetNs, NetNsProvider};
    use std::path::Path;

    fn engine(exec: &MockExecutor) -> InterfaceEngine<MockNetNsProvider, MockExecutor> {
        InterfaceEngine::new(exec.provider(), exec.clone())
    }

    async fn next_name_with(existing: &[&str]) -> String {
        let exec = MockExecutor::new();
        for (i, name) in existing.iter().enumerate() {
            exec.add_host_link(name, &format!("02:00:00:00:00:{i:02x}"));
        }
        engine(&exec)
            .determine_next_interface_name(MOVED_INTERFACE_PREFIX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_next_interface_name() {
        assert_eq!(next_name_with(&[]).await, "rookm0");
        assert_eq!(next_name_with(&["rookm0"]).await, "rookm1");
        assert_eq!(next_name_with(&["rookm0", "rookm2"]).await, "rookm1", "fills gaps");
        assert_eq!(next_name_with(&["rookm2"]).await, "rookm0");
        assert_eq!(
            next_name_with(&["rookm2", "rookm0", "rookm1", "rookm4"]).await,
            "rookm3",
            "creation order does not matter"
        );
        assert_eq!(next_name_with(&["rookm01", "rookm0"]).await, "rookm2", "rookm01 parses as 1");
        assert_eq!(next_name_with(&["diff1", "eth0"]).await, "rookm0");
        assert_eq!(
            next_name_with(&["rookmX", "rookm0"]).await,
            "rookm1",
            "non-numeric suffixes are ignored"
        );
    }

    #[tokio::test]
    async fn test_find_namespace_with_ip() {
        let exec = MockExecutor::new();
        exec.add_holder(&HolderFixture::default());
        let second = exec.add_holder(&HolderFixture {
            ns_name: "cni-holder-2",
            pod_ip: "10.1.2.4",
            mac: "d6:2f:2b:3f:8f:44",
            multus_addr: "192.168.20.8/24",
            ..HolderFixture::default()
        });

        let ns = engine(&exec).find_namespace_with_ip("10.1.2.4").await.unwrap();
        assert_eq!(ns.path(), second);
    }

    #[tokio::test]
    async fn test_find_namespace_skips_unreadable_namespaces() {
        let exec = MockExecutor::new();
        let broken = exec.add_holder(&HolderFixture {
            ns_name: "cni-aaa",
            pod_ip: "10.9.9.9",
            ..HolderFixture::default()
        });
        exec.state()
            .namespaces
            .get_mut(&broken)
            .unwrap()
            .unreadable
            .insert("eth0".to_string());
        let good = exec.add_holder(&HolderFixture {
            ns_name: "cni-bbb",
            mac: "d6:2f:2b:3f:8f:44",
            ..HolderFixture::default()
        });

        let ns = engine(&exec).find_namespace_with_ip("10.1.2.3").await.unwrap();
        assert_eq!(ns.path(), good);
    }

    #[tokio::test]
    async fn test_find_namespace_not_found_reports_skipped_errors() {
        let exec = MockExecutor::new();
        let broken = exec.add_holder(&HolderFixture::default());
        exec.state()
            .namespaces
            .get_mut(&broken)
            .unwrap()
            .unreadable
            .insert("eth0".to_string());

        let err = engine(&exec)
            .find_namespace_with_ip("10.200.0.1")
            .await
            .unwrap_err();
        match &err {
            NetError::NamespaceNotFound { ip, errors } => {
                assert_eq!(ip, "10.200.0.1");
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("cni-holder-1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_not_found(), "only a missing link counts as not found");
    }

    #[tokio::test]
    async fn test_find_interface_by_address_and_mac() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture::default());
        let eng = engine(&exec);
        let ns = exec.provider().namespace_by_path(&path).unwrap();

        assert_eq!(
            eng.find_interface_by_address(&ns, "192.168.20.7").await.unwrap(),
            Some("net1".to_string())
        );
        assert_eq!(eng.find_interface_by_address(&ns, "192.168.20.99").await.unwrap(), None);

        let mac: MacAddr = "d6:2f:2b:3f:8f:33".parse().unwrap();
        assert_eq!(
            eng.find_interface_by_hardware_address(&ns, mac).await.unwrap(),
            Some("net1".to_string())
        );
        let host = eng.host_namespace().unwrap();
        assert_eq!(eng.find_interface_by_hardware_address(&host, mac).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clone_and_configure_interface() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture::default());
        let eng = engine(&exec);
        let holder = exec.provider().namespace_by_path(&path).unwrap();
        let host = eng.host_namespace().unwrap();

        let config = eng.get_network_config(&holder, "net1").await.unwrap();
        assert_eq!(config.addrs.len(), 1);
        assert_eq!(config.routes.len(), 1);

        let clone = eng
            .clone_interface_to_host_namespace(&holder, &host, "net1", "rookm0")
            .await
            .unwrap();
        assert_eq!(clone.name, "rookm0");
        assert_eq!(clone.hardware_addr, config.link.hardware_addr);
        assert_eq!(clone.parent_index, Some(2));

        eng.configure_interface(&host, "rookm0", &config).await.unwrap();

        let host_state = exec.host();
        let created = host_state.link("rookm0").unwrap();
        assert!(created.up);
        assert_eq!(created.mtu, 1500);
        let addrs = host_state.addrs_of("rookm0");
        assert_eq!(addrs, vec![addr("192.168.20.7/24", "rookm0")], "label follows the clone");
        assert_eq!(host_state.routes_of("rookm0"), config.routes);

        assert!(
            exec.namespace(&path).link("net1").is_some(),
            "cloning leaves the holder interface in place"
        );
    }

    #[tokio::test]
    async fn test_configure_interface_is_idempotent() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture::default());
        let eng = engine(&exec);
        let holder = exec.provider().namespace_by_path(&path).unwrap();
        let host = eng.host_namespace().unwrap();

        let config = eng.get_network_config(&holder, "net1").await.unwrap();
        eng.clone_interface_to_host_namespace(&holder, &host, "net1", "rookm0")
            .await
            .unwrap();
        eng.configure_interface(&host, "rookm0", &config).await.unwrap();
        let calls_after_first = exec.calls().len();

        eng.configure_interface(&host, "rookm0", &config).await.unwrap();
        assert_eq!(exec.calls().len(), calls_after_first, "second pass changes nothing");
        assert_eq!(exec.host().addrs_of("rookm0").len(), 1);
    }

    #[tokio::test]
    async fn test_configure_interface_tolerates_kernel_added_routes() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture::default());
        exec.state().kernel_prefix_routes = true;
        let eng = engine(&exec);
        let holder = exec.provider().namespace_by_path(&path).unwrap();
        let host = eng.host_namespace().unwrap();

        let config = eng.get_network_config(&holder, "net1").await.unwrap();
        eng.clone_interface_to_host_namespace(&holder, &host, "net1", "rookm0")
            .await
            .unwrap();
        eng.configure_interface(&host, "rookm0", &config).await.unwrap();

        let routes = exec.host().routes_of("rookm0");
        assert_eq!(routes.len(), 1, "the kernel's subnet route is kept");
        assert_eq!(routes[0].destination, config.routes[0].destination);
        assert!(
            !exec.calls().iter().any(|c| c.starts_with("route ")),
            "no route was added"
        );
    }

    #[tokio::test]
    async fn test_add_existing_address_is_exists_error() {
        let exec = MockExecutor::new();
        exec.add_host_link("rookm0", "02:00:00:00:00:01");
        let link = exec.host().link("rookm0").unwrap().clone();
        let address = addr("192.168.20.7/24", "rookm0");

        exec.add_address(&link, &address).await.unwrap();
        let err = exec.add_address(&link, &address).await.unwrap_err();

        assert!(err.is_exists(), "{err}");
        assert!(!err.is_not_found());
        assert!(!NetError::LinkNotFound { name: "rookm0".to_string() }.is_exists());
    }

    #[tokio::test]
    async fn test_clone_rejects_parent_outside_host_namespace() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture {
            parent_netns_id: Some(1),
            ..HolderFixture::default()
        });
        let eng = engine(&exec);
        let holder = exec.provider().namespace_by_path(&path).unwrap();
        let host = eng.host_namespace().unwrap();

        let err = eng
            .clone_interface_to_host_namespace(&holder, &host, "net1", "rookm0")
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::UnsupportedParentNamespace { .. }));
        let msg = err.to_string();
        assert!(msg.contains("net namespace ID 1"), "{msg}");
        assert!(msg.contains("\"net1\""), "{msg}");
        assert!(exec.host().link("rookm0").is_none(), "nothing is created");
    }

    #[tokio::test]
    async fn test_clone_rejects_unset_parent_namespace() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture {
            parent_netns_id: None,
            ..HolderFixture::default()
        });
        let eng = engine(&exec);
        let holder = exec.provider().namespace_by_path(&path).unwrap();
        let host = eng.host_namespace().unwrap();

        let err = eng
            .clone_interface_to_host_namespace(&holder, &host, "net1", "rookm0")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unset"));
    }

    #[tokio::test]
    async fn test_disable_and_delete_interface() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture::default());
        let eng = engine(&exec);
        let holder = exec.provider().namespace_by_path(&path).unwrap();

        eng.disable_interface(&holder, "net1").await.unwrap();
        assert!(!exec.namespace(&path).link("net1").unwrap().up);

        eng.delete_interface(&holder, "net1").await.unwrap();
        assert!(exec.namespace(&path).link("net1").is_none());

        eng.delete_interface(&holder, "net1")
            .await
            .expect("deleting a missing interface succeeds");
    }

    #[tokio::test]
    async fn test_cleanup_all_interfaces_with_prefix() {
        let exec = MockExecutor::new();
        exec.add_host_link("eth0", "02:00:00:00:00:01");
        exec.add_host_link("rookm0", "02:00:00:00:00:02");
        exec.add_host_link("rookm3", "02:00:00:00:00:03");

        let mut removed = engine(&exec)
            .cleanup_all_interfaces_with_prefix(MOVED_INTERFACE_PREFIX)
            .await
            .unwrap();
        removed.sort();

        assert_eq!(removed, vec!["rookm0", "rookm3"]);
        assert_eq!(exec.host().names(), vec!["eth0"]);
    }

    #[tokio::test]
    async fn test_mock_move_link_to_namespace() {
        let exec = MockExecutor::new();
        let path = exec.add_holder(&HolderFixture::default());
        let provider = exec.provider();
        let holder = provider.namespace_by_path(&path).unwrap();
        let fd = provider
            .namespace_by_path(Path::new(MOCK_HOST_NS))
            .unwrap()
            .fd();

        let mover = exec.clone();
        holder
            .enter(move || async move {
                let link = mover.link_by_name("net1").await?;
                mover.move_link_to_namespace(&link, fd).await
            })
            .await
            .unwrap();

        assert!(exec.namespace(&path).link("net1").is_none());
        assert!(exec.host().link("net1").is_some());
        assert!(exec.host().addrs_of("net1").is_empty());
    }
}
