mod common;

use axum::http::StatusCode;
use common::{TestContext, build_test_context, create_request, request_json};
use resource_adjust::db::entities::instance;
use resource_adjust::error::AdjustError;
use resource_adjust::rules::files::RuleFilePaths;
use resource_adjust::services::RestoreStep;
use resource_adjust::web::models::LinkedVmRequest;
use sea_orm::EntityTrait;
use serde_json::json;

async fn bandwidth_group_with_two_vms(ctx: &TestContext) -> String {
    ctx.seed_vm(10, "vm-a", 1).await;
    ctx.seed_interface(10, "52:54:00:0a:0b:0c", 100, 200).await;
    ctx.seed_vm(11, "vm-b", 2).await;
    ctx.seed_interface(11, "52:54:00:0d:0e:0f", 300, 400).await;
    ctx.core
        .rule_service
        .create(create_request(
            "adjust_in_bw",
            "bw-d",
            "",
            json!([
                { "vmUuid": "vm-a", "device": "tap0a0b0c" },
                { "vmUuid": "vm-b", "device": "tap0d0e0f" }
            ]),
        ))
        .await
        .expect("group should be created")
        .group
        .uuid
}

async fn assert_nothing_left(ctx: &TestContext, group_uuid: &str, paths: &RuleFilePaths) {
    for path in paths.all() {
        assert!(!path.exists(), "{} should be removed", path.display());
    }
    assert!(ctx.link_rows().list(group_uuid).await.unwrap().is_empty());
    assert!(ctx.rules().find_by_uuid(group_uuid).await.unwrap().is_none());
    assert!(ctx.core.manifest.load().unwrap().is_empty());
}

#[tokio::test]
async fn delete_skips_unresolvable_vm_and_still_completes() {
    let mut ctx = build_test_context().await;
    let group_uuid = bandwidth_group_with_two_vms(&ctx).await;
    let paths = ctx.rule_paths(&ctx.group("bw-d").await);

    instance::Entity::delete_by_id(11).exec(ctx.db.as_ref()).await.unwrap();
    ctx.set_adjustment_status(Some("1")).await;
    ctx.channel.clear();

    let (status, outcome) = request_json(&ctx.app, "DELETE", "/api/adjust/rules/bw-d", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["restoreAttempts"], 1);
    assert_eq!(outcome["restored"], 1);
    assert_eq!(outcome["removedLinks"], 2);
    assert_eq!(outcome["warnings"].as_array().unwrap().len(), 1);
    assert!(outcome["warnings"][0].as_str().unwrap().contains("vm-b"));
    assert_eq!(outcome["hostCleanup"]["succeeded"], json!([1]));

    let restores = ctx.channel.calls_containing("set_nic_speed.sh");
    assert_eq!(restores.len(), 1);
    assert_eq!(restores[0].0, 1);
    assert!(restores[0].1.contains(" 10 tap0a0b0c 100 200"));
    assert_eq!(ctx.channel.calls_containing("cleanup_rule_metrics.sh").len(), 1);

    assert_nothing_left(&ctx, &group_uuid, &paths).await;
    // History of the restore outlives the group.
    assert_eq!(ctx.history().recent_for_group(&group_uuid, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_continues_past_failed_restores_and_hosts() {
    let mut ctx = build_test_context().await;
    let group_uuid = bandwidth_group_with_two_vms(&ctx).await;
    let group = ctx.group("bw-d").await;
    let paths = ctx.rule_paths(&group);

    ctx.set_adjustment_status(Some("1")).await;
    ctx.channel.fail_host(2);

    let outcome = ctx.core.rule_service.delete(&group_uuid).await.unwrap();
    assert!(outcome.restore_attempts <= 2);
    assert_eq!(outcome.restore_attempts, 2);
    assert_eq!(outcome.restored, 1);
    assert_eq!(outcome.warnings.len(), 2);
    assert_eq!(outcome.host_cleanup.succeeded, vec![1]);
    assert_eq!(outcome.host_cleanup.failed.len(), 1);

    assert_nothing_left(&ctx, &group_uuid, &paths).await;
}

#[tokio::test]
async fn delete_without_limits_issues_no_restore() {
    let ctx = build_test_context().await;
    let group_uuid = bandwidth_group_with_two_vms(&ctx).await;
    let paths = ctx.rule_paths(&ctx.group("bw-d").await);

    let outcome = ctx.core.rule_service.delete("bw-d").await.unwrap();
    assert_eq!(outcome.restore_attempts, 0);
    assert!(outcome.warnings.is_empty());
    assert!(ctx.channel.calls_containing("set_nic_speed.sh").is_empty());
    assert_eq!(ctx.channel.calls_containing("cleanup_rule_metrics.sh").len(), 2);

    assert_nothing_left(&ctx, &group_uuid, &paths).await;
}

#[tokio::test]
async fn unlink_restores_limited_interface() {
    let mut ctx = build_test_context().await;
    bandwidth_group_with_two_vms(&ctx).await;
    ctx.set_adjustment_status(Some("1")).await;
    ctx.channel.clear();

    let outcome = ctx
        .core
        .rule_service
        .unlink_vm(
            "bw-d",
            LinkedVmRequest {
                vm_uuid: "vm-a".to_string(),
                device: Some("tap0a0b0c".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(outcome.removed);
    assert_eq!(outcome.restore, Some(RestoreStep::Restored));

    let restores = ctx.channel.calls_containing("set_nic_speed.sh");
    assert_eq!(restores.len(), 1);
    assert!(restores[0].1.contains(" tap0a0b0c 100 200"));
    let zeroed = ctx.channel.calls_containing("--status 0");
    assert!(!zeroed.is_empty());

    let group = ctx.group("bw-d").await;
    let remaining = ctx.link_rows().list(&group.uuid).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].vm_uuid, "vm-b");
}

#[tokio::test]
async fn unlink_reports_linked_devices_when_device_differs() {
    let ctx = build_test_context().await;
    bandwidth_group_with_two_vms(&ctx).await;

    let unlink = |device: Option<&str>| LinkedVmRequest {
        vm_uuid: "vm-a".to_string(),
        device: device.map(str::to_string),
    };

    let err = ctx.core.rule_service.unlink_vm("bw-d", unlink(Some("tapffffff"))).await.unwrap_err();
    match err {
        AdjustError::NotFound(msg) => assert!(msg.contains("tap0a0b0c")),
        other => panic!("expected NotFound, got {other:?}"),
    }

    let err = ctx.core.rule_service.unlink_vm("bw-d", unlink(None)).await.unwrap_err();
    assert!(matches!(err, AdjustError::Validation(_)));

    let (status, _) = request_json(
        &ctx.app,
        "DELETE",
        "/api/adjust/rules/bw-d/links",
        Some(json!({ "vmUuid": "vm-unknown", "device": "tap0a0b0c" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bandwidth_metrics_are_republished_per_host() {
    let ctx = build_test_context().await;
    bandwidth_group_with_two_vms(&ctx).await;
    ctx.channel.clear();

    let (status, body) = request_json(&ctx.app, "POST", "/api/adjust/bandwidth-metrics/regenerate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interfaces"], 2);
    assert_eq!(body["hosts"]["succeeded"], json!([1, 2]));

    let published = ctx.channel.calls_containing("update_vm_interface_bandwidth.sh");
    assert_eq!(published.len(), 2);
    assert!(published.iter().any(|(host, cmd)| *host == 2 && cmd.contains(" inst-11 tap0d0e0f 300 400")));

    let (_, body) = request_json(&ctx.app, "POST", "/api/adjust/bandwidth-metrics/regenerate?hyper_id=1", None).await;
    assert_eq!(body["interfaces"], 1);
}
