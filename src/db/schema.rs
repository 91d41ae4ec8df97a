use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};
use tracing::info;

use crate::db::entities::{
    adjust_rule_group, adjustment_history, bw_rule_detail, cpu_rule_detail, instance,
    instance_interface, vm_rule_link,
};

/// Creates every table this crate touches, plus the link uniqueness index.
/// Safe to run on every start.
pub async fn ensure_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, instance::Entity).await?;
    create_table(db, &schema, instance_interface::Entity).await?;
    create_table(db, &schema, adjust_rule_group::Entity).await?;
    create_table(db, &schema, cpu_rule_detail::Entity).await?;
    create_table(db, &schema, bw_rule_detail::Entity).await?;
    create_table(db, &schema, vm_rule_link::Entity).await?;
    create_table(db, &schema, adjustment_history::Entity).await?;

    let link_index = Index::create()
        .name("idx_vm_rule_links_group_vm_interface")
        .table(vm_rule_link::Entity)
        .col(vm_rule_link::Column::GroupUuid)
        .col(vm_rule_link::Column::VmUuid)
        .col(vm_rule_link::Column::Interface)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(db.get_database_backend().build(&link_index)).await?;

    let history_index = Index::create()
        .name("idx_adjustment_history_group_time")
        .table(adjustment_history::Entity)
        .col(adjustment_history::Column::GroupUuid)
        .col(adjustment_history::Column::AdjustTime)
        .if_not_exists()
        .to_owned();
    db.execute(db.get_database_backend().build(&history_index)).await?;

    info!("Database schema is up to date.");
    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}
