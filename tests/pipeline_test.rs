use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, SecondsFormat, TimeZone, Utc};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};

use proxylog_forwarder::config::{parse_utc_offset, Config, UnmatchedPolicy};
use proxylog_forwarder::pipeline::{Pipeline, PipelineState};
use proxylog_forwarder::stats::StatsSnapshot;
use proxylog_forwarder::tail::SourceSpec;

const COLLECTOR_PATH: &str = "/api/v1/proxylog/";

/// Only one pipeline may run per process.
static ONE_AT_A_TIME: Mutex<()> = Mutex::const_new(());

async fn exclusive() -> MutexGuard<'static, ()> {
    ONE_AT_A_TIME.lock().await
}

const GATEWAY_LINE: &str =
    "2025/05/19 17:38:25 from 81.162.252.10:53312 accepted tcp:example.com:443 email: abc-123";
const PROXY_LINE: &str = "1747672705.0 81.162.252.10 abc-123 GET example.com:443 200 512";

struct Logs {
    _dir: tempfile::TempDir,
    proxy: PathBuf,
    gateway: PathBuf,
}

impl Logs {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let proxy = dir.path().join("access.log");
        let gateway = dir.path().join("xray-access.log");
        append(&proxy, "");
        append(&gateway, "");
        Self {
            _dir: dir,
            proxy,
            gateway,
        }
    }

    fn config(&self, server: &ServerGuard) -> Config {
        Config {
            proxy_source: SourceSpec::File(self.proxy.clone()),
            gateway_source: SourceSpec::File(self.gateway.clone()),
            gateway_utc_offset: parse_utc_offset("+01:00"),
            collector_url: format!("{}{}", server.url(), COLLECTOR_PATH),
            correlation_window: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
            file_wait_interval: Duration::from_secs(1),
            max_retries: 0,
            shutdown_timeout: Duration::from_secs(5),
            ..Config::default()
        }
    }
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("failed to open log file");
    file.write_all(text.as_bytes()).expect("failed to write log file");
    file.flush().expect("failed to flush log file");
}

fn gateway_line(ip: &str, email: &str) -> String {
    format!(
        "2025/05/19 17:38:25 from {}:40000 accepted tcp:example.com:443 email: {}\n",
        ip, email
    )
}

fn proxy_line(ip: &str, identity: &str) -> String {
    format!("1747672705.0 {} {} GET example.com:443 200 512\n", ip, identity)
}

async fn wait_until<F>(pipeline: &Pipeline, what: &str, done: F)
where
    F: Fn(&StatsSnapshot) -> bool,
{
    let result = timeout(Duration::from_secs(15), async {
        while !done(&pipeline.stats()) {
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await;

    if result.is_err() {
        panic!("timed out waiting for {}: {:?}", what, pipeline.stats());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn correlates_gateway_and_proxy_lines_end_to_end() {
    let _exclusive = exclusive().await;
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COLLECTOR_PATH)
        .match_body(Matcher::PartialJson(json!({
            "uuid": "abc-123",
            "ip": "81.162.252.10",
            "destination": "example.com:443",
            "status": "200",
            "bytes_sent": 512,
            "timestamp": "2025-05-19T16:38:25.000Z"
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let logs = Logs::new();
    let pipeline = Pipeline::new(logs.config(&server)).unwrap();
    assert!(pipeline.start().await);

    append(&logs.gateway, &format!("{}\n", GATEWAY_LINE));
    append(&logs.proxy, &format!("{}\n", PROXY_LINE));

    wait_until(&pipeline, "delivery", |s| s.delivered == 1).await;
    assert!(pipeline.stop().await);

    mock.assert_async().await;
    let stats = pipeline.stats();
    assert_eq!(stats.correlated, 1);
    assert_eq!(stats.parse_failures, 0);
    assert_eq!(stats.delivery_failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn correlates_with_gateway_in_host_local_zone() {
    let _exclusive = exclusive().await;
    let gateway_local = Local
        .with_ymd_and_hms(2025, 5, 19, 17, 38, 25)
        .earliest()
        .unwrap();
    let expected_timestamp = gateway_local
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COLLECTOR_PATH)
        .match_body(Matcher::PartialJson(json!({
            "uuid": "abc-123",
            "timestamp": expected_timestamp
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let logs = Logs::new();
    let config = Config {
        gateway_utc_offset: Config::default().gateway_utc_offset,
        ..logs.config(&server)
    };
    assert!(config.gateway_utc_offset.is_none());
    let pipeline = Pipeline::new(config).unwrap();
    pipeline.start().await;

    append(&logs.gateway, &format!("{}\n", GATEWAY_LINE));
    append(
        &logs.proxy,
        &format!(
            "{}.0 81.162.252.10 abc-123 GET example.com:443 200 512\n",
            gateway_local.timestamp()
        ),
    );

    wait_until(&pipeline, "delivery", |s| s.delivered == 1).await;
    pipeline.stop().await;
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn correlates_when_proxy_line_arrives_first() {
    let _exclusive = exclusive().await;
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COLLECTOR_PATH)
        .match_body(Matcher::PartialJson(json!({ "uuid": "abc-123" })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let logs = Logs::new();
    let pipeline = Pipeline::new(logs.config(&server)).unwrap();
    pipeline.start().await;

    append(&logs.proxy, &format!("{}\n", PROXY_LINE));
    sleep(Duration::from_millis(200)).await;
    append(&logs.gateway, &format!("{}\n", GATEWAY_LINE));

    wait_until(&pipeline, "delivery", |s| s.delivered == 1).await;
    pipeline.stop().await;

    mock.assert_async().await;
    assert_eq!(pipeline.stats().unmatched_dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_is_idempotent() {
    let _exclusive = exclusive().await;
    let server = Server::new_async().await;
    let logs = Logs::new();
    let pipeline = Pipeline::new(logs.config(&server)).unwrap();

    assert!(pipeline.start().await);
    assert!(!pipeline.start().await);
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(pipeline.active_readers(), 2);

    assert!(pipeline.stop().await);
    assert!(!pipeline.stop().await);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.active_readers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_deliveries_after_stop() {
    let _exclusive = exclusive().await;
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COLLECTOR_PATH)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let logs = Logs::new();
    let pipeline = Pipeline::new(logs.config(&server)).unwrap();
    pipeline.start().await;

    append(&logs.gateway, &gateway_line("10.0.0.1", "before-stop"));
    append(&logs.proxy, &proxy_line("10.0.0.1", "-"));
    wait_until(&pipeline, "first delivery", |s| s.delivered == 1).await;

    pipeline.stop().await;
    let lines_at_stop = pipeline.stats().proxy_lines;

    for i in 0..5 {
        let ip = format!("10.0.1.{}", i);
        append(&logs.gateway, &gateway_line(&ip, "after-stop"));
        append(&logs.proxy, &proxy_line(&ip, "-"));
    }
    sleep(Duration::from_millis(500)).await;

    mock.assert_async().await;
    assert_eq!(pipeline.stats().delivered, 1);
    assert_eq!(pipeline.stats().proxy_lines, lines_at_stop);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivery_failure_does_not_stop_pipeline() {
    let _exclusive = exclusive().await;
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", COLLECTOR_PATH)
        .match_body(Matcher::PartialJson(json!({ "uuid": "bad-user" })))
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", COLLECTOR_PATH)
        .match_body(Matcher::PartialJson(json!({ "uuid": "good-user" })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let logs = Logs::new();
    let pipeline = Pipeline::new(logs.config(&server)).unwrap();
    pipeline.start().await;

    append(&logs.gateway, &gateway_line("10.0.0.1", "bad-user"));
    append(&logs.proxy, &proxy_line("10.0.0.1", "-"));
    wait_until(&pipeline, "failed delivery", |s| s.delivery_failures == 1).await;

    append(&logs.gateway, &gateway_line("10.0.0.2", "good-user"));
    append(&logs.proxy, &proxy_line("10.0.0.2", "-"));
    wait_until(&pipeline, "successful delivery", |s| s.delivered == 1).await;

    pipeline.stop().await;

    failing.assert_async().await;
    accepted.assert_async().await;
    let stats = pipeline.stats();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.correlated, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unmatched_proxy_line_forwarded_as_unknown() {
    let _exclusive = exclusive().await;
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COLLECTOR_PATH)
        .match_body(Matcher::PartialJson(json!({
            "uuid": "unknown",
            "destination": "example.com:443"
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let logs = Logs::new();
    let config = Config {
        correlation_window: Duration::from_secs(1),
        unmatched_policy: UnmatchedPolicy::ForwardUnknown,
        ..logs.config(&server)
    };
    let pipeline = Pipeline::new(config).unwrap();
    pipeline.start().await;

    append(&logs.proxy, &proxy_line("10.9.9.9", "-"));
    wait_until(&pipeline, "unmatched delivery", |s| s.delivered == 1).await;
    pipeline.stop().await;

    mock.assert_async().await;
    assert_eq!(pipeline.stats().unmatched_forwarded, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unparsable_lines_are_counted_and_skipped() {
    let _exclusive = exclusive().await;
    let server = Server::new_async().await;
    let logs = Logs::new();
    let pipeline = Pipeline::new(logs.config(&server)).unwrap();
    pipeline.start().await;

    append(&logs.proxy, "garbage\n1747672705.0 10.0.0.1\n");
    append(&logs.gateway, "2025/05/19 17:38:25 something else entirely\n");

    wait_until(&pipeline, "parse failures", |s| s.parse_failures == 3).await;
    assert_eq!(pipeline.state(), PipelineState::Running);
    pipeline.stop().await;
}
