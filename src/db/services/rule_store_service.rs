use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entities::{adjust_rule_group, bw_rule_detail, cpu_rule_detail, vm_rule_link};
use crate::db::enums::RuleType;
use crate::error::{AdjustError, AdjustResult};
use crate::rules::{RuleConfig, ValidatedRule};

/// Fields of a rule group supplied at creation.
#[derive(Debug, Clone)]
pub struct NewRuleGroup {
    pub name: String,
    pub rule_id: String,
    pub owner: String,
    pub region_id: String,
    pub notify_url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleGroupFilter {
    #[serde(rename = "type")]
    pub rule_type: Option<RuleType>,
    pub owner: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleGroupChanges {
    pub name: Option<String>,
    pub notify_url: Option<String>,
}

/// Durable repository of rule groups and their single rule detail.
#[derive(Clone)]
pub struct RuleStore {
    db: Arc<DatabaseConnection>,
}

impl RuleStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Writes the group and its detail in one transaction.
    pub async fn create_group(
        &self,
        new_group: NewRuleGroup,
        rule: &ValidatedRule,
    ) -> AdjustResult<adjust_rule_group::Model> {
        if self.find_by_rule_id(&new_group.rule_id).await?.is_some() {
            return Err(AdjustError::Conflict(format!(
                "a rule group with rule id '{}' already exists",
                new_group.rule_id
            )));
        }

        let now = Utc::now();
        let group_uuid = Uuid::new_v4().to_string();
        let txn = self.db.begin().await?;

        let group = adjust_rule_group::ActiveModel {
            uuid: Set(group_uuid.clone()),
            rule_id: Set(new_group.rule_id),
            name: Set(new_group.name.clone()),
            rule_type: Set(rule.rule_type()),
            owner: Set(new_group.owner),
            enabled: Set(new_group.enabled),
            region_id: Set(new_group.region_id),
            notify_url: Set(new_group.notify_url),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        insert_detail(&txn, &group_uuid, &new_group.name, rule).await?;
        txn.commit().await?;
        Ok(group)
    }

    pub async fn find_by_rule_id(&self, rule_id: &str) -> AdjustResult<Option<adjust_rule_group::Model>> {
        Ok(adjust_rule_group::Entity::find()
            .filter(adjust_rule_group::Column::RuleId.eq(rule_id))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn find_by_uuid(&self, group_uuid: &str) -> AdjustResult<Option<adjust_rule_group::Model>> {
        Ok(adjust_rule_group::Entity::find()
            .filter(adjust_rule_group::Column::Uuid.eq(group_uuid))
            .one(self.db.as_ref())
            .await?)
    }

    /// Looks a group up by external rule id first, then by group uuid.
    pub async fn find_by_identifier(&self, identifier: &str) -> AdjustResult<adjust_rule_group::Model> {
        if let Some(group) = self.find_by_rule_id(identifier).await? {
            return Ok(group);
        }
        self.find_by_uuid(identifier)
            .await?
            .ok_or_else(|| AdjustError::NotFound(format!("rule group '{identifier}'")))
    }

    /// Loads the single rule detail of a group. Zero or several detail rows
    /// is a data-integrity fault.
    pub async fn load_rule(&self, group: &adjust_rule_group::Model) -> AdjustResult<ValidatedRule> {
        let config = match group.rule_type.direction() {
            None => {
                let details = cpu_rule_detail::Entity::find()
                    .filter(cpu_rule_detail::Column::GroupUuid.eq(&group.uuid))
                    .all(self.db.as_ref())
                    .await?;
                let detail = single_detail(&group.uuid, details)?;
                RuleConfig::from_cpu_detail(&detail)
            }
            Some(direction) => {
                let details = bw_rule_detail::Entity::find()
                    .filter(bw_rule_detail::Column::GroupUuid.eq(&group.uuid))
                    .all(self.db.as_ref())
                    .await?;
                let detail = single_detail(&group.uuid, details)?;
                if detail.direction != direction {
                    return Err(AdjustError::Integrity(format!(
                        "rule group {} of type {} holds a '{}' bandwidth detail",
                        group.uuid, group.rule_type, detail.direction
                    )));
                }
                RuleConfig::from_bw_detail(&detail)
            }
        };
        config
            .validate()
            .map_err(|e| AdjustError::Integrity(format!("stored rule of group {} is invalid: {e}", group.uuid)))
    }

    /// Newest first. Returns the page and the total number of matches.
    pub async fn list_groups(
        &self,
        filter: &RuleGroupFilter,
        page: u64,
        page_size: u64,
    ) -> AdjustResult<(Vec<adjust_rule_group::Model>, u64)> {
        let mut query = adjust_rule_group::Entity::find().order_by_desc(adjust_rule_group::Column::CreatedAt);
        if let Some(rule_type) = filter.rule_type {
            query = query.filter(adjust_rule_group::Column::RuleType.eq(rule_type));
        }
        if let Some(owner) = &filter.owner {
            query = query.filter(adjust_rule_group::Column::Owner.eq(owner.as_str()));
        }
        if let Some(enabled) = filter.enabled {
            query = query.filter(adjust_rule_group::Column::Enabled.eq(enabled));
        }

        let paginator = query.paginate(self.db.as_ref(), page_size);
        let total = paginator.num_items().await?;
        let groups = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((groups, total))
    }

    pub async fn all_groups(&self) -> AdjustResult<Vec<adjust_rule_group::Model>> {
        Ok(adjust_rule_group::Entity::find()
            .order_by_asc(adjust_rule_group::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn update_basic(
        &self,
        group: adjust_rule_group::Model,
        changes: RuleGroupChanges,
    ) -> AdjustResult<adjust_rule_group::Model> {
        if changes.name.is_none() && changes.notify_url.is_none() {
            return Ok(group);
        }
        let mut active: adjust_rule_group::ActiveModel = group.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(notify_url) = changes.notify_url {
            active.notify_url = Set(notify_url);
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn set_enabled(
        &self,
        group: adjust_rule_group::Model,
        enabled: bool,
    ) -> AdjustResult<adjust_rule_group::Model> {
        let mut active: adjust_rule_group::ActiveModel = group.into();
        active.enabled = Set(enabled);
        active.updated_at = Set(Utc::now());
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Replaces the group's detail row with `rule`.
    pub async fn replace_rule(&self, group: &adjust_rule_group::Model, rule: &ValidatedRule) -> AdjustResult<()> {
        if rule.rule_type() != group.rule_type {
            return Err(AdjustError::Validation(format!(
                "rule of type {} cannot replace a {} rule",
                rule.rule_type(),
                group.rule_type
            )));
        }
        let txn = self.db.begin().await?;
        delete_details(&txn, &group.uuid).await?;
        insert_detail(&txn, &group.uuid, &group.name, rule).await?;

        let mut active: adjust_rule_group::ActiveModel = group.clone().into();
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Deletes links, details and the group. History rows are kept.
    pub async fn delete_group(&self, group_uuid: &str) -> AdjustResult<()> {
        let txn = self.db.begin().await?;
        vm_rule_link::Entity::delete_many()
            .filter(vm_rule_link::Column::GroupUuid.eq(group_uuid))
            .exec(&txn)
            .await?;
        delete_details(&txn, group_uuid).await?;
        adjust_rule_group::Entity::delete_many()
            .filter(adjust_rule_group::Column::Uuid.eq(group_uuid))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

fn single_detail<T>(group_uuid: &str, mut details: Vec<T>) -> AdjustResult<T> {
    match details.len() {
        1 => Ok(details.remove(0)),
        n => Err(AdjustError::Integrity(format!(
            "rule group {group_uuid} has {n} rule details, expected exactly one"
        ))),
    }
}

async fn delete_details<C: ConnectionTrait>(conn: &C, group_uuid: &str) -> AdjustResult<()> {
    cpu_rule_detail::Entity::delete_many()
        .filter(cpu_rule_detail::Column::GroupUuid.eq(group_uuid))
        .exec(conn)
        .await?;
    bw_rule_detail::Entity::delete_many()
        .filter(bw_rule_detail::Column::GroupUuid.eq(group_uuid))
        .exec(conn)
        .await?;
    Ok(())
}

async fn insert_detail<C: ConnectionTrait>(
    conn: &C,
    group_uuid: &str,
    name: &str,
    rule: &ValidatedRule,
) -> AdjustResult<()> {
    let t = rule.thresholds();
    let now = Utc::now();
    match rule.rule_type().direction() {
        None => {
            cpu_rule_detail::ActiveModel {
                group_uuid: Set(group_uuid.to_string()),
                name: Set(name.to_string()),
                trigger_threshold: Set(t.trigger_threshold),
                recover_threshold: Set(t.recover_threshold),
                smooth_window: Set(t.smooth_window),
                trigger_duration: Set(t.trigger_duration),
                limit_duration: Set(t.limit_duration),
                limit_percent: Set(t.limit_percent),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }
        Some(direction) => {
            bw_rule_detail::ActiveModel {
                group_uuid: Set(group_uuid.to_string()),
                name: Set(name.to_string()),
                direction: Set(direction),
                trigger_threshold_pct: Set(t.trigger_threshold),
                recover_threshold_pct: Set(t.recover_threshold),
                smooth_window: Set(t.smooth_window),
                trigger_duration: Set(t.trigger_duration),
                limit_duration: Set(t.limit_duration),
                limit_value_pct: Set(t.limit_percent),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(())
}
