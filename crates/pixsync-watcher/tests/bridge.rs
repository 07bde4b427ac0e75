mod common;

use common::{wait_until, TestPeer};
use pixsync_core::memory::MemoryHost;
use pixsync_core::{Payload, ResourceEntry, TickScheduler};
use pixsync_server::{LoggingObserver, ServerConfig};
use pixsync_watcher::{Bridge, BridgeConfig};
use serde_json::{json, Value};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

fn bridge(host: &Rc<MemoryHost>) -> Bridge {
    let server_config = ServerConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    let bridge = Bridge::new(
        BridgeConfig::default(),
        server_config,
        host.clone(),
        Arc::new(LoggingObserver),
    );
    bridge.start().unwrap();
    bridge
}

fn connect(bridge: &Bridge) -> TestPeer {
    let peer = TestPeer::connect(bridge.server().local_addr().unwrap());
    assert!(wait_until(WAIT, || bridge.status().client_count == 1));
    peer
}

#[test]
fn inventory_pull_is_answered_with_request_id() {
    let host = Rc::new(MemoryHost::with_resources(vec![ResourceEntry::image(
        "hero.png",
        "/art/hero.png",
        [32, 32],
    )]));
    let bridge = bridge(&host);
    let mut peer = connect(&bridge);

    peer.send_json(&json!({"type": "GET_IMAGES", "data": null, "requestId": 7}));
    assert!(wait_until(WAIT, || {
        bridge.drain_now().map(|r| r.pulls_answered).unwrap_or(0) == 1
    }));

    let reply = peer.recv_json(WAIT).unwrap();
    assert_eq!(reply["type"], "GET_IMAGES");
    assert_eq!(reply["requestId"], 7);
    assert_eq!(reply["data"][0]["name"], "hero.png");
    assert_eq!(reply["data"][0]["size"], json!([32, 32]));

    bridge.stop().unwrap();
}

#[test]
fn sync_texture_round_trip_then_push() {
    let host = Rc::new(MemoryHost::new());
    let mut bridge = bridge(&host);
    let mut scheduler = TickScheduler::new();
    bridge.attach(&mut scheduler).unwrap();
    let mut peer = connect(&bridge);

    peer.send_json(&json!({
        "type": "SYNC_TEXTURE",
        "data": {"image": "tile.png", "file_path": "/tmp/tile.png", "project_size": [16, 16]},
        "requestId": 9
    }));
    assert!(wait_until(WAIT, || {
        scheduler.run_for(Duration::from_millis(50));
        !host.applied().is_empty()
    }));
    assert_eq!(
        host.applied(),
        vec![("tile.png".to_string(), Payload::path("/tmp/tile.png"))]
    );

    // Let the watchers notice the new resource.
    scheduler.run_for(Duration::from_millis(600));

    let mut frames: Vec<Value> = Vec::new();
    while let Some(frame) = peer.recv_json(Duration::from_millis(500)) {
        frames.push(frame);
    }

    let response = frames
        .iter()
        .find(|f| f["type"] == "SYNC_TEXTURE_RESPONSE")
        .expect("sync response");
    assert_eq!(response["requestId"], 9);
    assert_eq!(response["data"]["success"], true);
    assert_eq!(response["data"]["size"], json!([16, 16]));

    let push = frames
        .iter()
        .rev()
        .find(|f| f["type"] == "GET_IMAGES")
        .expect("inventory push");
    assert_eq!(push["requestId"], -1);
    assert_eq!(push["data"][0]["name"], "tile.png");

    assert!(frames
        .iter()
        .any(|f| f["type"] == "GET_UV_OVERLAY" && f["noshow"] == true));

    bridge.shutdown(&mut scheduler).unwrap();
}

#[test]
fn invalid_sync_texture_fails_immediately() {
    let host = Rc::new(MemoryHost::new());
    let bridge = bridge(&host);
    let mut peer = connect(&bridge);

    peer.send_json(&json!({"type": "SYNC_TEXTURE", "data": {"image": ""}, "requestId": 3}));
    let reply = peer.recv_json(WAIT).unwrap();

    assert_eq!(reply["type"], "SYNC_TEXTURE_RESPONSE");
    assert_eq!(reply["requestId"], 3);
    assert_eq!(reply["data"]["success"], false);

    let report = bridge.drain_now().unwrap();
    assert_eq!(report.applied + report.failed, 0);
    bridge.stop().unwrap();
}

#[test]
fn legacy_top_level_params_are_accepted() {
    let host = Rc::new(MemoryHost::new());
    let bridge = bridge(&host);
    let mut peer = connect(&bridge);

    peer.send_json(&json!({
        "type": "SYNC_TEXTURE",
        "image": "old.png",
        "file_path": "/tmp/old.png",
        "requestId": 4
    }));
    assert!(wait_until(WAIT, || {
        bridge.drain_now().map(|r| r.applied).unwrap_or(0) == 1
    }));

    let reply = peer.recv_json(WAIT).unwrap();
    assert_eq!(reply["requestId"], 4);
    assert_eq!(reply["data"]["image_name"], "old.png");
    bridge.stop().unwrap();
}
