use sea_orm::DatabaseConnection;
use std::sync::Arc;
use thiserror::Error;

use crate::alerting::WebhookIngestor;
use crate::db::services::{AdjustmentHistoryService, InstanceDirectory, RuleStore, VmLinkService};
use crate::links::{LinkManager, ManifestStore};
use crate::monitoring::{MonitoringError, PrometheusClient, StatusOracle, TargetCache};
use crate::notifications::NotificationService;
use crate::notifications::senders::NotificationSender;
use crate::remediation::RemediationExecutor;
use crate::rules::files::RuleFileManager;
use crate::rules::{RuleCompiler, RuleError};
use crate::server::command_dispatcher::{CommandDispatcher, HostCommandChannel};
use crate::server::config::ServerConfig;
use crate::services::{AdjustRuleService, BandwidthConfigService, ReconcileService};
use crate::web::AppState;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Rule directories unavailable: {0}")]
    Rules(#[from] RuleError),
    #[error("Prometheus client setup failed: {0}")]
    Monitoring(#[from] MonitoringError),
}

/// The wired control loop. The host command channel and the notification
/// sender are supplied by the caller.
#[derive(Clone)]
pub struct CoreServices {
    pub rule_service: Arc<AdjustRuleService>,
    pub ingestor: Arc<WebhookIngestor>,
    pub bandwidth_service: Arc<BandwidthConfigService>,
    pub reconciler: Arc<ReconcileService>,
    pub oracle: Arc<StatusOracle>,
    pub links: Arc<LinkManager>,
    pub compiler: Arc<RuleCompiler>,
    pub manifest: Arc<ManifestStore>,
}

impl CoreServices {
    pub fn build(
        config: &ServerConfig,
        db: Arc<DatabaseConnection>,
        channel: Arc<dyn HostCommandChannel>,
        sender: Arc<dyn NotificationSender>,
    ) -> Result<Self, BootstrapError> {
        let prometheus = Arc::new(PrometheusClient::new(
            config.prometheus_url.clone(),
            config.query_timeout(),
            config.reload_timeout(),
        )?);
        let targets = Arc::new(TargetCache::new(prometheus.clone(), config.target_cache_ttl()));
        let oracle = Arc::new(StatusOracle::new(prometheus.clone()).with_target_cache(targets));
        let dispatcher = CommandDispatcher::new(channel);

        let rules = RuleStore::new(db.clone());
        let instances = InstanceDirectory::new(db.clone());
        let history = AdjustmentHistoryService::new(db.clone());

        let compiler = Arc::new(RuleCompiler::new(
            RuleFileManager::new(
                &config.general_rules_dir,
                &config.special_rules_dir,
                &config.enabled_rules_dir,
            ),
            prometheus.clone(),
        )?);
        let manifest = Arc::new(ManifestStore::new(&config.manifest_path, config.scrape_target.clone()));
        let links = Arc::new(LinkManager::new(
            VmLinkService::new(db.clone()),
            instances.clone(),
            manifest.clone(),
        ));

        let executor = Arc::new(RemediationExecutor::new(
            dispatcher.clone(),
            instances.clone(),
            rules.clone(),
            history.clone(),
            prometheus,
        ));
        let reconciler = Arc::new(ReconcileService::new(
            rules.clone(),
            links.clone(),
            compiler.clone(),
            instances.clone(),
            oracle.clone(),
            executor.clone(),
            dispatcher.clone(),
        ));
        let rule_service = Arc::new(AdjustRuleService::new(
            rules,
            links.clone(),
            compiler.clone(),
            instances.clone(),
            history,
            reconciler.clone(),
        ));
        let notifier = Arc::new(NotificationService::new(sender));
        let ingestor = Arc::new(WebhookIngestor::new(oracle.clone(), executor, notifier));
        let bandwidth_service = Arc::new(BandwidthConfigService::new(instances, dispatcher));

        Ok(Self {
            rule_service,
            ingestor,
            bandwidth_service,
            reconciler,
            oracle,
            links,
            compiler,
            manifest,
        })
    }

    pub fn app_state(&self, config: Arc<ServerConfig>) -> Arc<AppState> {
        Arc::new(AppState {
            rule_service: self.rule_service.clone(),
            ingestor: self.ingestor.clone(),
            bandwidth_service: self.bandwidth_service.clone(),
            config,
        })
    }
}
