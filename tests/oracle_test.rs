//! Oracle tests against hand-written log files.
//!
//! These exercise the verdicts of the built-in scenarios without running any
//! client: each test writes the logs a cluster would have produced.

use std::fs;
use std::time::Duration;

use distkv_harness::config::HarnessConfig;
use distkv_harness::log::log_path;
use distkv_harness::model::NodeAddress;
use distkv_harness::oracle::{evaluate, Oracle};
use distkv_harness::scenario;
use distkv_harness::HarnessError;
use tempfile::TempDir;

fn addr(port: u16) -> NodeAddress {
    NodeAddress::new("localhost", port)
}

struct Outputs {
    dir: TempDir,
    config: HarnessConfig,
}

impl Outputs {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = HarnessConfig::default()
            .with_dirs(dir.path().join("input_files"), dir.path().join("output_files"))
            .with_log_timeout(Duration::from_millis(500))
            .with_poll_interval(Duration::from_millis(50));
        fs::create_dir_all(&config.paths.output_dir).unwrap();
        Outputs { dir, config }
    }

    fn write(&self, port: u16, text: &str) {
        fs::write(log_path(&self.config.paths.output_dir, &addr(port)), text).unwrap();
    }

    fn oracle(&self) -> Oracle {
        Oracle::new(&self.config)
    }
}

/// Logs of a cluster that behaves as the stale-read scenario expects
fn write_expected_logs(out: &Outputs) {
    out.write(9002, "# distkv-log v1\nset x 12 10004\n");
    out.write(9003, "# distkv-log v1\nwait - - 8001\nget x 12 2\n");
    out.write(9005, "# distkv-log v1\nwait - - 8001\nget x NULL 1\n");
}

#[tokio::test]
async fn test_stale_read_passes_with_expected_logs() {
    let out = Outputs::new();
    write_expected_logs(&out);
    let scenario = scenario::stale_read().unwrap();

    let verdict = out.oracle().check(&scenario).await.unwrap();

    assert!(verdict.passed(), "{}", verdict);
    assert_eq!(verdict.predicates_checked, 3);
    let latencies: Vec<_> = verdict.latencies.iter().map(|l| (l.label.as_str(), l.latency_ms)).collect();
    assert_eq!(
        latencies,
        vec![("write", Some(10004)), ("first read", Some(2)), ("second read", Some(1))]
    );
}

#[tokio::test]
async fn test_write_acknowledged_with_status_passes() {
    let out = Outputs::new();
    write_expected_logs(&out);
    out.write(9002, "set x ok 10003\nget x 12 1\n");

    for scenario in scenario::builtin().unwrap() {
        let verdict = out.oracle().check(&scenario).await.unwrap();
        assert!(verdict.passed(), "{}", verdict);
    }
}

#[tokio::test]
async fn test_go_client_transcripts_reach_a_verdict() {
    let out = Outputs::new();
    out.write(
        9002,
        "INITIATED @ 1700000000000: set x 12\n\
         RECEIVED: primary-set-result x 12 1700000000\n\
         FINISHED @ 1700000000000 (LATENCY: 10004 ms): set x 12\n\
         INITIATED @ 1700000010004: exit\n",
    );
    for (port, index, value) in [(9003, 0, "12"), (9005, 1, "NULL")] {
        out.write(
            port,
            &format!(
                "INITIATED @ 1700000000000: wait 8\n\
                 FINISHED @ 1700000000000 (LATENCY: 8001 ms): wait 8\n\
                 INITIATED @ 1700000008001: get x {index}\n\
                 RECEIVED: get-result x {value} 1700000008\n\
                 FINISHED @ 1700000008001 (LATENCY: 1502 ms): get x {index}\n\
                 INITIATED @ 1700000009503: exit\n"
            ),
        );
    }
    let scenario = scenario::stale_read().unwrap();

    let verdict = out.oracle().check(&scenario).await.unwrap();

    assert!(verdict.passed(), "{}", verdict);
    assert_eq!(verdict.latencies[0].latency_ms, Some(10004));
    assert_eq!(verdict.latencies[2].latency_ms, Some(1502));
}

#[tokio::test]
async fn test_replica_that_caught_up_too_early_fails() {
    let out = Outputs::new();
    write_expected_logs(&out);
    out.write(9005, "wait - - 8001\nget x 12 1\n");
    let scenario = scenario::stale_read().unwrap();

    let verdict = out.oracle().check(&scenario).await.unwrap();

    assert!(!verdict.passed());
    assert_eq!(verdict.failures.len(), 1);
    let failure = &verdict.failures[0];
    assert_eq!(failure.client, Some(addr(9005)));
    assert_eq!(failure.expected, "contains \"NULL\"");
    assert_eq!(failure.found, "[wait - -; get x 12]");
}

#[tokio::test]
async fn test_latency_field_is_not_a_fresh_read() {
    // The read returned NULL in 12 ms; a substring search would see "12"
    let out = Outputs::new();
    write_expected_logs(&out);
    out.write(9003, "wait - - 8012\nget x NULL 12\n");
    let scenario = scenario::stale_read().unwrap();

    let verdict = out.oracle().check(&scenario).await.unwrap();

    assert!(!verdict.passed());
    assert_eq!(verdict.failures[0].client, Some(addr(9003)));
}

#[tokio::test]
async fn test_read_your_writes_needs_own_read() {
    let out = Outputs::new();
    write_expected_logs(&out);
    // 9002 did not observe its own write through the primary
    out.write(9002, "set x 12 10004\nget x NULL 1\n");
    let scenario = scenario::read_your_writes().unwrap();

    let verdict = out.oracle().check(&scenario).await.unwrap();

    let descriptions: Vec<_> = verdict.failures.iter().map(|f| f.description.as_str()).collect();
    assert_eq!(
        descriptions,
        vec!["logs are sequentially consistent", "localhost:9002 entry 1 contains \"12\""]
    );
    assert_eq!(verdict.latencies.last().unwrap().latency_ms, Some(1));
}

#[tokio::test]
async fn test_missing_log_is_a_hard_failure() {
    let out = Outputs::new();
    out.write(9002, "set x 12 10004\n");
    out.write(9003, "wait - - 8001\nget x 12 2\n");
    let scenario = scenario::stale_read().unwrap();

    let err = out.oracle().check(&scenario).await.unwrap_err();

    match err {
        HarnessError::MissingLogFile { client, path, waited } => {
            assert_eq!(client, addr(9005));
            assert!(path.ends_with("localhost_9005.txt"));
            assert!(waited >= Duration::from_millis(500));
        }
        other => panic!("expected MissingLogFile, got {other}"),
    }
}

#[tokio::test]
async fn test_unsupported_log_version() {
    let out = Outputs::new();
    write_expected_logs(&out);
    out.write(9003, "# distkv-log v9\nget x 12 2\n");
    let scenario = scenario::stale_read().unwrap();

    let err = out.oracle().check(&scenario).await.unwrap_err();

    assert!(matches!(err, HarnessError::MalformedLog { line: Some(1), .. }));
    assert!(out.dir.path().exists());
}

#[test]
fn test_reevaluation_gives_same_verdict() {
    let out = Outputs::new();
    write_expected_logs(&out);
    out.write(9005, "wait - - 8001\nget x 12 1\n");
    let scenario = scenario::read_your_writes().unwrap();
    let clients = scenario.topology().clients();

    let first = evaluate(&scenario, &out.oracle().read_existing(clients).unwrap());
    let second = evaluate(&scenario, &out.oracle().read_existing(clients).unwrap());

    assert_eq!(first, second);
    assert!(!first.passed());
}
