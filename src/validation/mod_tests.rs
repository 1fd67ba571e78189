// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the validation test driver and its results.

#[cfg(test)]
mod tests {
    use super::super::fake::FakeResources;
    use super::super::{
        NodeConfig, ValidationError, ValidationTest, ValidationTestConfig, ValidationTestResults,
    };
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;

    fn config() -> ValidationTestConfig {
        let mut config = ValidationTestConfig {
            namespace: "rook-ceph".to_string(),
            public_network: "public-net".to_string(),
            ..ValidationTestConfig::converged()
        };
        config.node_types = BTreeMap::from([(
            "all".to_string(),
            NodeConfig {
                osds_per_node: 1,
                ..NodeConfig::default()
            },
        )]);
        config
    }

    #[test]
    fn test_report_skips_empty_suggestions() {
        let mut results = ValidationTestResults::default();
        assert_eq!(results.suggested_debugging_report(), "");

        results.add_suggestions(["", "check multus logs", ""]);
        results.add_suggestions(Some("check the switch".to_string()));
        assert_eq!(
            results.suggested_debugging_report(),
            "Suggested things to investigate before installing with Multus:\n    \
             - check multus logs\n    - check the switch\n"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ValidationError::InvalidConfig("bad".to_string()).exit_code(), 22);
        assert_eq!(ValidationError::Canceled.exit_code(), 1);
        assert_eq!(ValidationError::Fatal("boom".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!ValidationError::NotReady("later".to_string()).is_fatal());
        assert!(ValidationError::Fatal("now".to_string()).is_fatal());
        assert!(ValidationError::InvalidConfig("now".to_string()).is_fatal());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_running() {
        let config = ValidationTestConfig {
            public_network: String::new(),
            ..config()
        };
        let err = ValidationTest::new(config, FakeResources::three_nodes(&[1]))
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 22);
    }

    /// All clients ready within seconds: no suggestions, then a clean teardown
    #[tokio::test(start_paused = true)]
    async fn test_run_then_clean_up() {
        let test = ValidationTest::new(config(), FakeResources::three_nodes(&[1, 3, 5])).unwrap();

        let (results, outcome) = test.run(&CancellationToken::new()).await;
        outcome.unwrap();
        assert_eq!(results.suggested_debugging_report(), "");

        let (cleanup_results, cleanup_outcome) = test.clean_up().await;
        cleanup_outcome.unwrap();
        assert!(cleanup_results.is_empty());
        assert!(!test.resources.owner_exists());

        let calls = test.resources.calls();
        assert_eq!(
            &calls[..3],
            ["create_owner", "start_web_server", "start_image_pullers"]
        );
        assert_eq!(calls.last().map(String::as_str), Some("clean_up"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_test_is_suggested() {
        let test = ValidationTest::new(config(), FakeResources::three_nodes(&[1, 1, 1])).unwrap();
        let (_, first) = test.run(&CancellationToken::new()).await;
        first.unwrap();

        let (results, outcome) = test.run(&CancellationToken::new()).await;
        assert!(outcome.is_err());
        assert!(results.suggestions()[0].starts_with("there could be a past test"));
    }
}
