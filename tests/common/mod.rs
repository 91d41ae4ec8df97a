#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use mockito::{Matcher, Mock, ServerGuard};
use resource_adjust::db::entities::{adjust_rule_group, instance, instance_interface};
use resource_adjust::db::schema::ensure_schema;
use resource_adjust::db::services::{AdjustmentHistoryService, RuleStore, VmLinkService};
use resource_adjust::notifications::senders::webhook::WebhookSender;
use resource_adjust::rules::files::RuleFilePaths;
use resource_adjust::server::command_dispatcher::{DispatcherError, HostCommandChannel};
use resource_adjust::server::config::ServerConfig;
use resource_adjust::server::core_services::CoreServices;
use resource_adjust::web::create_axum_router;
use resource_adjust::web::models::CreateRuleGroupRequest;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

/// Host command channel that records every command instead of running it.
#[derive(Default)]
pub struct RecordingChannel {
    calls: Mutex<Vec<(i32, String)>>,
    failing_hosts: Mutex<BTreeSet<i32>>,
}

impl RecordingChannel {
    pub fn calls(&self) -> Vec<(i32, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_containing(&self, needle: &str) -> Vec<(i32, String)> {
        self.calls()
            .into_iter()
            .filter(|(_, command)| command.contains(needle))
            .collect()
    }

    pub fn fail_host(&self, hyper_id: i32) {
        self.failing_hosts.lock().unwrap().insert(hyper_id);
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl HostCommandChannel for RecordingChannel {
    async fn execute(&self, hyper_id: i32, command: &str) -> Result<(), DispatcherError> {
        self.calls.lock().unwrap().push((hyper_id, command.to_string()));
        if self.failing_hosts.lock().unwrap().contains(&hyper_id) {
            return Err(DispatcherError::HostUnreachable(hyper_id, "simulated outage".to_string()));
        }
        Ok(())
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<ServerConfig>,
    pub core: CoreServices,
    pub app: axum::Router,
    pub channel: Arc<RecordingChannel>,
    pub prometheus: ServerGuard,
    pub notify: ServerGuard,
    base_mocks: Vec<Mock>,
    status_mock: Option<Mock>,
}

fn vector_body(samples: Value) -> String {
    json!({
        "status": "success",
        "data": { "resultType": "vector", "result": samples }
    })
    .to_string()
}

pub async fn build_test_context() -> TestContext {
    let temp_dir = tempfile::tempdir().expect("temp dir should be created");
    let root = temp_dir.path();

    let db_path = root.join("adjust.db");
    let db = Database::connect(format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .expect("sqlite should open");
    ensure_schema(&db).await.expect("schema should be created");
    let db = Arc::new(db);

    let mut prometheus = mockito::Server::new_async().await;
    let mut base_mocks = Vec::new();
    base_mocks.push(
        prometheus
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("libvirt_domain_info_vstate".into()))
            .with_status(200)
            .with_body(vector_body(json!([])))
            .create_async()
            .await,
    );
    base_mocks.push(
        prometheus
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("vm_interface_bandwidth_config_mbps".into()))
            .with_status(200)
            .with_body(vector_body(json!([
                {"metric": {"direction": "in"}, "value": [1700000000.0, "100"]},
                {"metric": {"direction": "out"}, "value": [1700000000.0, "200"]}
            ])))
            .create_async()
            .await,
    );
    base_mocks.push(
        prometheus
            .mock("POST", "/-/reload")
            .with_status(200)
            .create_async()
            .await,
    );
    let notify = mockito::Server::new_async().await;

    let config = Arc::new(ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
        prometheus_url: prometheus.url(),
        command_endpoint: "http://127.0.0.1:9/exec".to_string(),
        general_rules_dir: root.join("rules_general").display().to_string(),
        special_rules_dir: root.join("rules_special").display().to_string(),
        enabled_rules_dir: root.join("rules_enabled").display().to_string(),
        manifest_path: root.join("lists/matched_vms.json").display().to_string(),
        scrape_target: "localhost:9090".to_string(),
        query_timeout_secs: 2,
        dispatch_timeout_secs: 2,
        notify_timeout_secs: 2,
        reload_timeout_secs: 2,
        target_cache_ttl_secs: 60,
        log_dir: root.join("logs").display().to_string(),
    });

    let channel = Arc::new(RecordingChannel::default());
    let sender = Arc::new(WebhookSender::new(Duration::from_secs(2)));
    let core = CoreServices::build(&config, db.clone(), channel.clone(), sender)
        .expect("services should build");
    let app = create_axum_router(core.app_state(config.clone()));

    let mut ctx = TestContext {
        temp_dir,
        db,
        config,
        core,
        app,
        channel,
        prometheus,
        notify,
        base_mocks,
        status_mock: None,
    };
    ctx.set_adjustment_status(None).await;
    ctx
}

impl TestContext {
    /// Value every adjustment status query answers with; `None` is an empty
    /// result.
    pub async fn set_adjustment_status(&mut self, value: Option<&str>) {
        if let Some(old) = self.status_mock.take() {
            old.remove_async().await;
        }
        let samples = match value {
            Some(v) => json!([{ "metric": {}, "value": [1700000000.0, v] }]),
            None => json!([]),
        };
        let mock = self
            .prometheus
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("adjustment_status".into()))
            .with_status(200)
            .with_body(vector_body(samples))
            .create_async()
            .await;
        self.status_mock = Some(mock);
    }

    pub fn notify_url(&self) -> String {
        format!("{}/notify", self.notify.url())
    }

    pub async fn seed_vm(&self, id: i32, uuid: &str, hyper_id: i32) {
        instance::ActiveModel {
            id: Set(id),
            uuid: Set(uuid.to_string()),
            hyper_id: Set(hyper_id),
            status: Set("active".to_string()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("instance should insert");
    }

    pub async fn seed_interface(&self, instance_id: i32, mac_addr: &str, inbound: i32, outbound: i32) {
        instance_interface::ActiveModel {
            instance_id: Set(instance_id),
            mac_addr: Set(mac_addr.to_string()),
            inbound: Set(inbound),
            outbound: Set(outbound),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("interface should insert");
    }

    pub fn rules(&self) -> RuleStore {
        RuleStore::new(self.db.clone())
    }

    pub fn link_rows(&self) -> VmLinkService {
        VmLinkService::new(self.db.clone())
    }

    pub fn history(&self) -> AdjustmentHistoryService {
        AdjustmentHistoryService::new(self.db.clone())
    }

    pub async fn group(&self, identifier: &str) -> adjust_rule_group::Model {
        self.rules()
            .find_by_identifier(identifier)
            .await
            .expect("group should exist")
    }

    pub fn rule_paths(&self, group: &adjust_rule_group::Model) -> RuleFilePaths {
        self.core.compiler.paths(group)
    }

    pub fn read_general(&self, group: &adjust_rule_group::Model) -> String {
        std::fs::read_to_string(&self.rule_paths(group).general).expect("general rule file should exist")
    }

    /// Whether the general rule's exclusion regex names `domain`.
    pub fn general_excludes(&self, group: &adjust_rule_group::Model, domain: &str) -> bool {
        self.read_general(group).contains(&exclusion_token(domain))
    }
}

/// A domain as written in the rule file: regex-escaped, then quoted as a
/// PromQL string, then quoted again as a YAML string.
pub fn exclusion_token(domain: &str) -> String {
    regex::escape(domain).replace('\\', r"\\\\")
}

pub fn thresholds() -> Value {
    json!({
        "triggerThreshold": 80.0,
        "recoverThreshold": 60.0,
        "triggerDuration": 60,
        "limitDuration": 300,
        "limitPercent": 50
    })
}

pub fn create_request(rule_type: &str, rule_id: &str, notify_url: &str, linked_vms: Value) -> CreateRuleGroupRequest {
    serde_json::from_value(json!({
        "name": format!("group {rule_id}"),
        "type": rule_type,
        "owner": "tenant-a",
        "regionId": "region-1",
        "ruleId": rule_id,
        "notifyUrl": notify_url,
        "rule": thresholds(),
        "linkedVms": linked_vms
    }))
    .expect("create request should deserialize")
}

pub fn firing_alert(labels: Value) -> Value {
    json!({
        "status": "firing",
        "labels": labels,
        "annotations": { "summary": "CPU high", "description": "CPU above threshold" },
        "startsAt": "2026-10-16T08:00:00Z",
        "endsAt": "0001-01-01T00:00:00Z"
    })
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.map(|b| b.to_string()).unwrap_or_default()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_raw(app: &axum::Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.expect("router should answer");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body should read");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
