use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::services::{BandwidthRegenerateOutcome, DeleteOutcome, RegenerateOutcome, UnlinkOutcome};
use crate::web::models::{
    CreateRuleGroupRequest, HistoryQuery, HistoryResponse, LinkVmResponse, LinkedVmRequest, ListRuleGroupsQuery,
    PatchRuleGroupRequest, PatchRuleGroupResponse, RegenerateBandwidthQuery, RuleGroupDetailResponse,
    RuleGroupPageResponse, RuleGroupResponse, SetEnabledRequest, VmLinkResponse,
};
use crate::web::{AppState, error::AppError};

pub fn create_adjust_router() -> Router<Arc<AppState>> {
    Router::<Arc<AppState>>::new()
        .route("/rules", post(create_rule_group).get(list_rule_groups))
        .route("/rules/regenerate", post(regenerate_rules))
        .route(
            "/rules/{identifier}",
            get(get_rule_group).patch(patch_rule_group).delete(delete_rule_group),
        )
        .route("/rules/{identifier}/status", put(set_rule_group_enabled))
        .route(
            "/rules/{identifier}/links",
            get(list_links).post(link_vm).delete(unlink_vm),
        )
        .route("/rules/{identifier}/history", get(list_history))
        .route("/bandwidth-metrics/regenerate", post(regenerate_bandwidth_metrics))
}

#[axum::debug_handler]
async fn create_rule_group(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateRuleGroupRequest>,
) -> Result<(StatusCode, Json<RuleGroupDetailResponse>), AppError> {
    let detail = app_state.rule_service.create(payload).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn list_rule_groups(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListRuleGroupsQuery>,
) -> Result<Json<RuleGroupPageResponse>, AppError> {
    Ok(Json(app_state.rule_service.list(query).await?))
}

async fn get_rule_group(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<RuleGroupDetailResponse>, AppError> {
    Ok(Json(app_state.rule_service.get(&identifier).await?))
}

#[axum::debug_handler]
async fn patch_rule_group(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    Json(payload): Json<PatchRuleGroupRequest>,
) -> Result<Json<PatchRuleGroupResponse>, AppError> {
    Ok(Json(app_state.rule_service.patch(&identifier, payload).await?))
}

async fn delete_rule_group(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<DeleteOutcome>, AppError> {
    Ok(Json(app_state.rule_service.delete(&identifier).await?))
}

async fn set_rule_group_enabled(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    Json(payload): Json<SetEnabledRequest>,
) -> Result<Json<RuleGroupResponse>, AppError> {
    Ok(Json(
        app_state
            .rule_service
            .set_enabled(&identifier, payload.enabled)
            .await?,
    ))
}

async fn list_links(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<Vec<VmLinkResponse>>, AppError> {
    Ok(Json(app_state.rule_service.links(&identifier).await?))
}

#[axum::debug_handler]
async fn link_vm(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    Json(payload): Json<LinkedVmRequest>,
) -> Result<Json<LinkVmResponse>, AppError> {
    Ok(Json(app_state.rule_service.link_vm(&identifier, payload).await?))
}

#[axum::debug_handler]
async fn unlink_vm(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    Json(payload): Json<LinkedVmRequest>,
) -> Result<Json<UnlinkOutcome>, AppError> {
    Ok(Json(app_state.rule_service.unlink_vm(&identifier, payload).await?))
}

async fn list_history(
    State(app_state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryResponse>>, AppError> {
    Ok(Json(
        app_state
            .rule_service
            .history(&identifier, query.limit)
            .await?,
    ))
}

async fn regenerate_rules(State(app_state): State<Arc<AppState>>) -> Result<Json<RegenerateOutcome>, AppError> {
    Ok(Json(app_state.rule_service.regenerate_all().await?))
}

async fn regenerate_bandwidth_metrics(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<RegenerateBandwidthQuery>,
) -> Result<Json<BandwidthRegenerateOutcome>, AppError> {
    Ok(Json(
        app_state
            .bandwidth_service
            .regenerate(query.hyper_id)
            .await?,
    ))
}
