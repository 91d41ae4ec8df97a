mod common;

use axum::http::StatusCode;
use common::{TestContext, build_test_context, create_request, firing_alert, request_json, request_raw};
use mockito::Matcher;
use resource_adjust::db::enums::AdjustmentStatus;
use serde_json::{Value, json};

const WEBHOOK: &str = "/api/adjust/webhook";

async fn cpu_group(ctx: &TestContext, rule_id: &str) -> String {
    ctx.core
        .rule_service
        .create(create_request("adjust_cpu", rule_id, &ctx.notify_url(), json!([])))
        .await
        .expect("group should be created")
        .group
        .uuid
}

fn cpu_labels(ctx: &TestContext, group_uuid: &str, action: &str) -> Value {
    json!({
        "alertname": "CPUAdjustLimit",
        "severity": "warning",
        "domain": "inst-5",
        "rule_id": format!("adjust-cpu-inst-5-{group_uuid}"),
        "global_rule_id": "cpu-b",
        "rule_group": group_uuid,
        "action_type": action,
        "instance_id": "vm-5",
        "alert_type": "adjust_cpu",
        "region_id": "region-1",
        "notify_url": ctx.notify_url()
    })
}

async fn post_alerts(ctx: &TestContext, alerts: Vec<Value>) -> (StatusCode, Value) {
    request_json(&ctx.app, "POST", WEBHOOK, Some(json!({ "status": "firing", "alerts": alerts }))).await
}

#[tokio::test]
async fn firing_limit_dispatches_once_and_replay_while_limited_is_skipped() {
    let mut ctx = build_test_context().await;
    ctx.seed_vm(5, "vm-5", 7).await;
    let group_uuid = cpu_group(&ctx, "cpu-b").await;

    let notified = ctx
        .notify
        .mock("POST", "/notify")
        .match_body(Matcher::Regex(r#""adjustment_status":"success""#.into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let alert = firing_alert(cpu_labels(&ctx, &group_uuid, "limit_cpu"));
    let (status, body) = post_alerts(&ctx, vec![alert.clone()]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["total_alerts"], 1);
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["failed_count"], 0);
    assert_eq!(body["message"], "Resource adjustment processing completed");

    let limits = ctx.channel.calls_containing("adjust_cpu_hotplug.sh");
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].0, 7);
    assert!(limits[0].1.contains(" inst-5 50"));

    let history = ctx.history().recent_for_group(&group_uuid, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AdjustmentStatus::Completed);
    assert_eq!(history[0].action_type, "limit_cpu");
    assert_eq!(history[0].rule_id, format!("adjust-cpu-inst-5-{group_uuid}"));

    // Same alert again, now that the gauge reports the limit.
    ctx.set_adjustment_status(Some("1")).await;
    ctx.channel.clear();
    let (status, body) = post_alerts(&ctx, vec![alert]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 0);
    assert_eq!(body["skipped_count"], 1);
    assert_eq!(body["results"][0]["outcome"], "deduplicated");

    assert!(ctx.channel.calls().is_empty());
    assert_eq!(ctx.history().recent_for_group(&group_uuid, 10).await.unwrap().len(), 1);
    notified.assert_async().await;
}

#[tokio::test]
async fn resolved_restore_runs_even_when_limited() {
    let mut ctx = build_test_context().await;
    ctx.seed_vm(5, "vm-5", 7).await;
    let group_uuid = cpu_group(&ctx, "cpu-b").await;
    ctx.set_adjustment_status(Some("1")).await;

    let notified = ctx
        .notify
        .mock("POST", "/notify")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""state":"resolved""#.into()),
            Matcher::Regex(r#""rule_id":"cpu-b""#.into()),
            Matcher::Regex("RESOLVED: Resource adjustment completed successfully".into()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut alert = firing_alert(cpu_labels(&ctx, &group_uuid, "restore_cpu"));
    alert["status"] = json!("resolved");
    let (status, body) = post_alerts(&ctx, vec![alert]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 1);

    let restores = ctx.channel.calls_containing("adjust_cpu_hotplug.sh");
    assert_eq!(restores.len(), 1);
    assert!(restores[0].1.ends_with(" inst-5 restore"));
    notified.assert_async().await;
}

#[tokio::test]
async fn bandwidth_limit_is_computed_from_configured_total() {
    let ctx = build_test_context().await;
    ctx.seed_vm(10, "vm-a", 1).await;
    ctx.seed_interface(10, "52:54:00:0a:0b:0c", 100, 200).await;
    let group_uuid = ctx
        .core
        .rule_service
        .create(create_request(
            "adjust_in_bw",
            "bw-in",
            "",
            json!([{ "vmUuid": "vm-a", "device": "tap0a0b0c" }]),
        ))
        .await
        .unwrap()
        .group
        .uuid;

    let alert = firing_alert(json!({
        "domain": "inst-10",
        "rule_id": format!("adjust-bw-inst-10-{group_uuid}"),
        "rule_group": group_uuid,
        "action_type": "limit_in_bw",
        "target_device": "tap0a0b0c",
        "instance_id": "vm-a"
    }));
    let (_, body) = post_alerts(&ctx, vec![alert]).await;
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["results"][0]["notified"], false);

    let speeds = ctx.channel.calls_containing("set_nic_speed.sh");
    assert_eq!(speeds.len(), 1);
    assert!(speeds[0].1.contains(" 10 tap0a0b0c 50 0 --inbound-only"));
    let status_updates = ctx.channel.calls_containing("update_vm_bandwidth_adjustment_status.sh");
    assert_eq!(status_updates.len(), 1);
    assert!(status_updates[0].1.contains("--status 1"));
}

#[tokio::test]
async fn failed_dispatch_is_recorded_and_notified() {
    let mut ctx = build_test_context().await;
    ctx.seed_vm(5, "vm-5", 7).await;
    let group_uuid = cpu_group(&ctx, "cpu-b").await;
    ctx.channel.fail_host(7);

    let notified = ctx
        .notify
        .mock("POST", "/notify")
        .match_body(Matcher::Regex(r#""adjustment_status":"failed""#.into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (_, body) = post_alerts(&ctx, vec![firing_alert(cpu_labels(&ctx, &group_uuid, "limit_cpu"))]).await;
    assert_eq!(body["failed_count"], 1);
    assert_eq!(body["results"][0]["outcome"], "failed");

    let history = ctx.history().recent_for_group(&group_uuid, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AdjustmentStatus::Failed);
    assert!(history[0].details.starts_with("Processing limit_cpu failed"));
    notified.assert_async().await;
}

#[tokio::test]
async fn alerts_missing_labels_are_rejected_without_side_effects() {
    let mut ctx = build_test_context().await;
    ctx.seed_vm(5, "vm-5", 7).await;
    let group_uuid = cpu_group(&ctx, "cpu-b").await;
    let notified = ctx.notify.mock("POST", "/notify").expect(0).create_async().await;

    let mut labels = cpu_labels(&ctx, &group_uuid, "limit_cpu");
    labels.as_object_mut().unwrap().remove("action_type");
    let (status, body) = post_alerts(&ctx, vec![firing_alert(labels)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failed_count"], 1);
    assert_eq!(body["results"][0]["outcome"], "rejected");

    assert!(ctx.channel.calls().is_empty());
    assert!(ctx.history().recent_for_group(&group_uuid, 10).await.unwrap().is_empty());
    notified.assert_async().await;
}

#[tokio::test]
async fn config_missing_only_notifies() {
    let mut ctx = build_test_context().await;
    let notified = ctx
        .notify
        .mock("POST", "/notify")
        .match_body(Matcher::Regex(r#""action_type":"config_missing""#.into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let alert = firing_alert(json!({
        "domain": "inst-10",
        "rule_id": "adjust-bw-inst-10-g",
        "rule_group": "g",
        "action_type": "config_missing",
        "target_device": "tap0a0b0c",
        "notify_url": ctx.notify_url()
    }));
    let (_, body) = post_alerts(&ctx, vec![alert]).await;
    assert_eq!(body["success_count"], 1);
    assert!(ctx.channel.calls().is_empty());
    assert!(ctx.history().recent_for_group("g", 10).await.unwrap().is_empty());
    notified.assert_async().await;
}

#[tokio::test]
async fn malformed_payload_is_a_bad_request() {
    let ctx = build_test_context().await;
    let (status, body) = request_raw(&ctx.app, "POST", WEBHOOK, "{ not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Malformed JSON"));
}

#[tokio::test]
async fn limit_without_rule_group_label_finds_group_from_rule_ids() {
    let ctx = build_test_context().await;
    ctx.seed_vm(5, "vm-5", 7).await;
    let group_uuid = cpu_group(&ctx, "cpu-b").await;

    // Only the external rule id identifies the group.
    let mut labels = cpu_labels(&ctx, &group_uuid, "limit_cpu");
    labels.as_object_mut().unwrap().remove("rule_group");
    let (status, body) = post_alerts(&ctx, vec![firing_alert(labels)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 1, "unexpected body: {body}");
    let limits = ctx.channel.calls_containing("adjust_cpu_hotplug.sh");
    assert_eq!(limits.len(), 1);
    assert!(limits[0].1.contains(" inst-5 50"));

    // Neither label present: the uuid suffix of the per-VM rule id is used.
    ctx.channel.clear();
    let mut labels = cpu_labels(&ctx, &group_uuid, "limit_cpu");
    let map = labels.as_object_mut().unwrap();
    map.remove("rule_group");
    map.remove("global_rule_id");
    let (status, body) = post_alerts(&ctx, vec![firing_alert(labels)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 1, "unexpected body: {body}");
    assert_eq!(ctx.channel.calls_containing("adjust_cpu_hotplug.sh").len(), 1);

    let history = ctx.history().recent_for_group(&group_uuid, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|row| row.status == AdjustmentStatus::Completed));
}
