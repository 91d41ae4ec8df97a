use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use std::sync::Arc;

use crate::db::entities::adjustment_history;
use crate::db::enums::AdjustmentStatus;

#[derive(Debug, Clone)]
pub struct NewAdjustment {
    pub domain_name: String,
    pub rule_id: String,
    pub group_uuid: String,
    pub action_type: String,
}

/// Persists the outcome of every remediation attempt.
#[derive(Clone)]
pub struct AdjustmentHistoryService {
    db: Arc<DatabaseConnection>,
}

impl AdjustmentHistoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Opens a `processing` row for an attempt about to be dispatched.
    pub async fn start(&self, new: NewAdjustment) -> Result<adjustment_history::Model, DbErr> {
        let details = format!("Processing {} (domain: {})", new.action_type, new.domain_name);
        adjustment_history::ActiveModel {
            domain_name: Set(new.domain_name),
            rule_id: Set(new.rule_id),
            group_uuid: Set(new.group_uuid),
            action_type: Set(new.action_type),
            status: Set(AdjustmentStatus::Processing),
            details: Set(details),
            adjust_time: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
    }

    pub async fn finish(
        &self,
        id: i32,
        status: AdjustmentStatus,
        details: String,
    ) -> Result<adjustment_history::Model, DbErr> {
        adjustment_history::ActiveModel {
            id: Set(id),
            status: Set(status),
            details: Set(details),
            adjust_time: Set(Utc::now()),
            ..Default::default()
        }
        .update(self.db.as_ref())
        .await
    }

    /// Inserts a row that is already final. Used when no `processing` row
    /// could be opened before dispatch.
    pub async fn record_final(
        &self,
        new: NewAdjustment,
        status: AdjustmentStatus,
        details: String,
    ) -> Result<adjustment_history::Model, DbErr> {
        adjustment_history::ActiveModel {
            domain_name: Set(new.domain_name),
            rule_id: Set(new.rule_id),
            group_uuid: Set(new.group_uuid),
            action_type: Set(new.action_type),
            status: Set(status),
            details: Set(details),
            adjust_time: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
    }

    pub async fn recent_for_group(
        &self,
        group_uuid: &str,
        limit: u64,
    ) -> Result<Vec<adjustment_history::Model>, DbErr> {
        adjustment_history::Entity::find()
            .filter(adjustment_history::Column::GroupUuid.eq(group_uuid))
            .order_by_desc(adjustment_history::Column::AdjustTime)
            .order_by_desc(adjustment_history::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }
}
