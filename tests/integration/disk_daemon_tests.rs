//! Disk daemon client tests against a mock HTTP server

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use osd_remove_controller::config::DiskDaemonConfig;
use osd_remove_controller::models::DiskDaemonState;
use osd_remove_controller::services::{DiskDaemonClient, DiskInventory, RetryPolicy};

fn client_for(server: &MockServer, retry: RetryPolicy) -> DiskDaemonClient {
    DiskDaemonClient::new(
        &DiskDaemonConfig {
            scheme: "http".to_string(),
            port: server.address().port(),
            timeout_secs: 5,
        },
        retry,
    )
    .unwrap()
}

#[tokio::test]
async fn test_osd_report_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/osdReport"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "ok",
            "osds_report": {
                "osds": {
                    "20": [{
                        "osd_uuid": "uuid-20",
                        "osd_fsid": "fsid-1",
                        "osd_device": [{"name": "/dev/vdc", "partition": "/dev/ceph-20/osd-block-uuid-20"}],
                        "osd_partitions": [{"partition": "/dev/ceph-20/osd-block-uuid-20", "type": "block", "lvm": true}]
                    }]
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::once());
    let report = client.osd_report("127.0.0.1").await.unwrap();

    assert_eq!(report.state, DiskDaemonState::Ok);
    let osds = report.osds_report.unwrap().osds;
    assert_eq!(osds["20"][0].osd_uuid, "uuid-20");
    assert_eq!(osds["20"][0].devices[0].name, "/dev/vdc");
}

#[tokio::test]
async fn test_null_body_is_empty_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/osdReport"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::once());
    let report = client.osd_report("127.0.0.1").await.unwrap();
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn test_preparing_report_is_retried_then_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/osdReport"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "preparing"})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::new(2, Duration::from_millis(10)));
    let err = client.osd_report("127.0.0.1").await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.starts_with("Retries (2/2) exceeded"), "{}", msg);
    assert!(msg.contains("node report is not prepared yet"), "{}", msg);
}

#[tokio::test]
async fn test_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/osdReport"))
        .respond_with(ResponseTemplate::new(500).set_body_string("lsblk failed"))
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::once());
    let err = client.osd_report("127.0.0.1").await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("500"), "{}", msg);
    assert!(msg.contains("lsblk failed"), "{}", msg);
}
