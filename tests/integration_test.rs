//! Integration tests for squall

use squall::config::{Config, OutputFormat};
use squall::flow::FlatRecord;
use squall::pipeline::run_pipeline;
use squall::state::{META_PROCESSED_BY, META_RECORD_COUNT, PROCESSED_BY_TAG};
use tempfile::TempDir;

const FLOW_BLOB: &str = r#"{"records": [
    {
        "time": "2023-11-14T22:00:00.000Z",
        "category": "NetworkSecurityGroupFlowEvent",
        "operationName": "NetworkSecurityGroupFlowEvents",
        "resourceId": "/SUBSCRIPTIONS/X/RESOURCEGROUPS/RG/PROVIDERS/MICROSOFT.NETWORK/NETWORKSECURITYGROUPS/TEST-NSG",
        "properties": {"Version": 2},
        "flowRecords": {"flows": [
            {
                "rule": "DefaultRule_AllowInternetOutBound",
                "flowGroups": [
                    {
                        "mac": "000D3AF87856",
                        "flowTuples": [
                            "1700000000,10.0.0.4,13.107.42.14,44931,443,T,O,A,B,10,1200,12,8000",
                            "1700000010,10.0.0.4,13.107.42.14,44932,443,T,O,A,E,,,,"
                        ]
                    }
                ]
            },
            {
                "rule": "DefaultRule_DenyAllInBound",
                "flowGroups": [
                    {
                        "mac": "000D3AF87856",
                        "flowTuples": ["1700000020,185.220.101.1,10.0.0.4,55000,22,T,I,D,B,,,,"]
                    }
                ]
            }
        ]}
    },
    {
        "time": "2023-11-14T22:01:00.000Z",
        "category": "NetworkSecurityGroupFlowEvent",
        "operationName": "NetworkSecurityGroupFlowEvents",
        "resourceId": "/SUBSCRIPTIONS/X/RESOURCEGROUPS/RG/PROVIDERS/MICROSOFT.NETWORK/NETWORKSECURITYGROUPS/TEST-NSG",
        "properties": {"Version": 1},
        "flowRecords": {"flows": [
            {
                "rule": "UserRule_allow-https",
                "flowGroups": [
                    {
                        "mac": "000D3AF87857",
                        "flowTuples": ["1700000060,10.0.0.5,10.0.0.6,443,52000,T,O,A"]
                    }
                ]
            }
        ]}
    }
]}"#;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, body).unwrap();
    path
}

mod config_tests {
    use super::*;

    #[test]
    fn test_config_from_file_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
sources:
  - url: "/var/lib/flowlogs"

delivery:
  endpoint: "https://collector.example.com/ingest"
"#,
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sources.len(), 1);

        let delivery = config.delivery.unwrap();
        assert_eq!(delivery.batch_size, 1000);
        assert!(delivery.compress);
        assert_eq!(delivery.max_retries, 3);

        assert_eq!(config.processing.state_prefix, "_squall");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
    }

    #[test]
    fn test_config_env_interpolation() {
        std::env::set_var("SQUALL_IT_TOKEN", "itest-token");

        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
sources:
  - url: "${SQUALL_IT_SOURCE:-/var/lib/flowlogs}"

delivery:
  endpoint: "https://collector.example.com/ingest"
  bearer_token: "${SQUALL_IT_TOKEN}"
"#,
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sources[0].url, "/var/lib/flowlogs");
        assert_eq!(
            config.delivery.unwrap().bearer_token.as_deref(),
            Some("itest-token")
        );

        std::env::remove_var("SQUALL_IT_TOKEN");
    }

    #[test]
    fn test_config_rejects_missing_destination() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
sources:
  - url: "/var/lib/flowlogs"
"#,
        );
        assert!(Config::from_file(&path).is_err());
    }
}

mod pipeline_tests {
    use super::*;

    fn end_to_end_config(source_dir: &TempDir, out_path: &std::path::Path) -> Config {
        let yaml = format!(
            r#"
sources:
  - url: "{}"

output:
  path: "{}"
  format: ndjson

metrics:
  enabled: false
"#,
            source_dir.path().display(),
            out_path.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_flattening() {
        let source_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out_path = out_dir.path().join("flat.ndjson");

        let blob_dir = source_dir.path().join("y=2023/m=11/d=14/h=22");
        std::fs::create_dir_all(&blob_dir).unwrap();
        std::fs::write(blob_dir.join("macAddress=000D3AF87856.json"), FLOW_BLOB).unwrap();

        let stats = run_pipeline(end_to_end_config(&source_dir, &out_path), false)
            .await
            .unwrap();

        assert_eq!(stats.blobs_processed, 1);
        assert_eq!(stats.records_flattened, 4);
        assert!(stats.is_clean());

        let written = std::fs::read_to_string(&out_path).unwrap();
        let records: Vec<FlatRecord> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 4);

        // Version 2 record with all counters populated
        assert_eq!(records[0].version, 2);
        assert_eq!(records[0].nsg_rule_name, "DefaultRule_AllowInternetOutBound");
        assert_eq!(records[0].flow_state.as_deref(), Some("B"));
        assert_eq!(records[0].bytes_s_to_d.as_deref(), Some("1200"));

        // Version 2 record with empty counters defaults to "0"
        assert_eq!(records[1].flow_state.as_deref(), Some("E"));
        assert_eq!(records[1].packets_s_to_d.as_deref(), Some("0"));

        // Inbound deny from the second rule group
        assert_eq!(records[2].device_direction, "I");
        assert_eq!(records[2].device_action, "D");

        // Version 1 record omits the version 2 fields entirely
        assert_eq!(records[3].version, 1);
        assert!(records[3].flow_state.is_none());
        assert!(!written.lines().nth(3).unwrap().contains("flowState"));
    }

    #[tokio::test]
    async fn test_annotation_sidecar_written_and_honored() {
        let source_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out_path = out_dir.path().join("flat.ndjson");

        std::fs::write(source_dir.path().join("flows.json"), FLOW_BLOB).unwrap();

        let first = run_pipeline(end_to_end_config(&source_dir, &out_path), false)
            .await
            .unwrap();
        assert_eq!(first.blobs_processed, 1);

        // The sidecar annotation exists and records this tool's pass.
        let sidecar = source_dir.path().join("_squall/flows.json.meta.json");
        let annotation: std::collections::HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&sidecar).unwrap()).unwrap();
        assert_eq!(annotation.get(META_PROCESSED_BY).unwrap(), PROCESSED_BY_TAG);
        assert_eq!(annotation.get(META_RECORD_COUNT).unwrap(), "4");

        // An unchanged blob is skipped on the next run.
        let second = run_pipeline(end_to_end_config(&source_dir, &out_path), false)
            .await
            .unwrap();
        assert_eq!(second.blobs_processed, 0);
        assert_eq!(second.blobs_skipped, 1);

        // A corrupted annotation fails open toward reprocessing.
        std::fs::write(&sidecar, b"garbage").unwrap();
        let third = run_pipeline(end_to_end_config(&source_dir, &out_path), false)
            .await
            .unwrap();
        assert_eq!(third.blobs_processed, 1);
    }

    #[tokio::test]
    async fn test_multiple_sources_aggregate() {
        let source_a = TempDir::new().unwrap();
        let source_b = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out_path = out_dir.path().join("flat.ndjson");

        std::fs::write(source_a.path().join("a.json"), FLOW_BLOB).unwrap();
        std::fs::write(source_b.path().join("b.json"), FLOW_BLOB).unwrap();

        let mut config = end_to_end_config(&source_a, &out_path);
        config.sources.push(squall::config::SourceConfig {
            url: source_b.path().display().to_string(),
        });

        let stats = run_pipeline(config, false).await.unwrap();
        assert_eq!(stats.blobs_processed, 2);
        assert_eq!(stats.records_flattened, 8);

        let written = std::fs::read_to_string(&out_path).unwrap();
        assert_eq!(written.lines().count(), 8);
    }

    #[tokio::test]
    async fn test_array_output_format() {
        let source_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out_path = out_dir.path().join("flat.json");

        std::fs::write(source_dir.path().join("flows.json"), FLOW_BLOB).unwrap();

        let mut config = end_to_end_config(&source_dir, &out_path);
        config.output.as_mut().unwrap().format = OutputFormat::Array;

        run_pipeline(config, false).await.unwrap();

        let records: Vec<FlatRecord> =
            serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
        assert_eq!(records.len(), 4);
    }
}

mod storage_tests {
    use squall::storage::BackendConfig;

    #[test]
    fn test_azure_url_parsing() {
        let config = BackendConfig::parse_url(
            "abfss://flowlogs@myaccount.dfs.core.windows.net/resourceId=xyz",
        )
        .unwrap();
        match config {
            BackendConfig::Azure(azure) => {
                assert_eq!(azure.account, "myaccount");
                assert_eq!(azure.container, "flowlogs");
            }
            _ => panic!("Expected Azure config"),
        }
    }

    #[test]
    fn test_local_url_parsing() {
        let config = BackendConfig::parse_url("/var/lib/flowlogs").unwrap();
        match config {
            BackendConfig::Local(local) => {
                assert_eq!(local.path, "/var/lib/flowlogs");
            }
            _ => panic!("Expected Local config"),
        }
    }
}
