// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the mode controller.

#[cfg(test)]
mod tests {
    use crate::batch::BatchSize;
    use crate::config::Config;
    use crate::constants::{EXIT_AUTH_CONFIG_ERROR, EXIT_REJECTED_ERROR, EXIT_TRANSFER_ERROR};
    use crate::controller::*;
    use crate::errors::{ConfigError, ReconcileError, SendError};
    use tokio::net::TcpListener;

    fn config(servers: &[String]) -> Config {
        let mut config = Config::parse(
            "zones:\n  example.com:\n    records:\n      www:\n        host: [192.0.2.1]\n  example.org:\n    records:\n      www:\n        host: [192.0.2.2]\n",
            "test.yml",
        )
        .unwrap();
        config.servers = servers.to_vec();
        config.timeout = Some(2);
        config
    }

    async fn unused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn report(zone: &str, error: Option<ReconcileError>) -> ZoneReport {
        ZoneReport {
            zone: zone.to_string(),
            mode: Mode::Apply,
            server: Some("192.0.2.53".to_string()),
            serial: Some(7),
            operations: 5,
            additions: 4,
            removals: 1,
            batches: 3,
            batches_acknowledged: 1,
            error,
        }
    }

    fn rejected(batch: usize) -> ReconcileError {
        ReconcileError::Send(SendError::Rejected {
            batch,
            server: "192.0.2.53".to_string(),
            rcode: "NotAuth".to_string(),
        })
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(Mode::Check.to_string(), "check");
        assert_eq!(Mode::Apply.to_string(), "insert");
        assert_eq!(serde_json::to_string(&Mode::Apply).unwrap(), "\"insert\"");
    }

    #[test]
    fn test_run_options_defaults() {
        let options = RunOptions::new(Mode::Check);

        assert_eq!(options.batch_size, BatchSize::Unbounded);
        assert!(options.zone.is_none());
        assert!(!options.exit_error);
    }

    #[test]
    fn test_summary_reports_failing_batch() {
        let summary = report("example.com.", Some(rejected(1))).summary();

        assert!(!summary.success);
        assert_eq!(summary.stage, Some("transmit"));
        assert_eq!(summary.reason, Some("UpdateRejected"));
        assert_eq!(summary.failed_batch, Some(1));
        assert_eq!(summary.batches_acknowledged, Some(1));
        assert_eq!(summary.transient, Some(false));

        let text = summary.to_string();
        assert!(text.starts_with(
            "example.com. [insert]: 5 operations (4 additions, 1 removals) in 3 batches, 1 acknowledged"
        ));
        assert!(text.contains("failed at transmit (batch 1)"));
    }

    #[test]
    fn test_summary_json_omits_empty_fields() {
        let mut ok = report("example.com.", None);
        ok.mode = Mode::Check;

        let json = serde_json::to_value(ok.summary()).unwrap();

        assert_eq!(json["zone"], "example.com.");
        assert_eq!(json["mode"], "check");
        assert_eq!(json["success"], true);
        assert_eq!(json["operations"], 5);
        assert!(json.get("batchesAcknowledged").is_none());
        assert!(json.get("stage").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_exit_code_is_first_failure() {
        let run = RunReport {
            zones: vec![
                report("a.example.", None),
                report("b.example.", Some(rejected(0))),
                report(
                    "c.example.",
                    Some(ReconcileError::Config(ConfigError::Invalid {
                        reason: "x".to_string(),
                    })),
                ),
            ],
        };

        assert_eq!(run.exit_code(), EXIT_REJECTED_ERROR);
        assert_eq!(run.summaries().len(), 3);
        assert_eq!(RunReport::default().exit_code(), 0);
    }

    #[test]
    fn test_select_zones() {
        let states = config(&["a".to_string()]).desired_states().unwrap();

        let all = select_zones(states.clone(), None).unwrap();
        assert_eq!(all.len(), 2);

        let one = select_zones(states.clone(), Some("EXAMPLE.org")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].zone().to_string(), "example.org.");

        let err = select_zones(states, Some("example.net")).unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_bad_key_fails_before_any_zone() {
        let mut bad = config(&["a".to_string()]);
        bad.tsig = Some(crate::tsig::TsigKey {
            name: "k.example.com".to_string(),
            algorithm: "hmac-md5".to_string(),
            secret: "c2VjcmV0".to_string(),
        });

        let err = Reconciler::from_config(&bad).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_AUTH_CONFIG_ERROR);
        assert_eq!(err.stage(), "sign");
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_each_zone_at_snapshot() {
        let config = config(&[unused_address().await]);

        let report = run(&config, &RunOptions::new(Mode::Check)).await.unwrap();

        assert_eq!(report.zones.len(), 2);
        for zone in &report.zones {
            let error = zone.error.as_ref().unwrap();
            assert_eq!(error.stage(), "snapshot");
            assert!(error.is_transient());
            assert_eq!(zone.batches_acknowledged, 0);
        }
        assert_eq!(report.exit_code(), EXIT_TRANSFER_ERROR);
    }

    #[tokio::test]
    async fn test_exit_error_stops_after_first_failing_zone() {
        let config = config(&[unused_address().await]);
        let mut options = RunOptions::new(Mode::Apply);
        options.exit_error = true;

        let report = run(&config, &options).await.unwrap();

        assert_eq!(report.zones.len(), 1);
        assert_eq!(report.zones[0].zone, "example.com.");
    }
}
