//! Hierarchy repository (层级实体数据访问)
//!
//! 每一层级一张表，父级通过 `<parent>_id` 列引用，删除时 RESTRICT。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{postgres::PgTx, HierarchyStore};
use crate::{
    error::AppError,
    models::hierarchy::{Entity, EntityKind, EntityRef},
};

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: i64,
    name: String,
    parent_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EntityRow {
    fn into_entity(self, kind: EntityKind) -> Entity {
        Entity {
            id: self.id,
            kind,
            name: self.name,
            parent: kind
                .parent_kind()
                .zip(self.parent_id)
                .map(|(parent_kind, id)| EntityRef::new(parent_kind, id)),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// 指向父级的外键列
fn parent_column(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Plant => None,
        EntityKind::Area => Some("plant_id"),
        EntityKind::Sector => Some("area_id"),
        EntityKind::Asset => Some("sector_id"),
    }
}

fn select_columns(kind: EntityKind) -> String {
    let parent = parent_column(kind).unwrap_or("NULL::BIGINT");
    format!("id, name, {} AS parent_id, created_at, updated_at", parent)
}

#[async_trait]
impl HierarchyStore for PgTx {
    async fn insert_entity(
        &mut self,
        kind: EntityKind,
        name: &str,
        parent: Option<EntityRef>,
    ) -> Result<Entity, AppError> {
        if parent.map(|p| p.kind) != kind.parent_kind() {
            return Err(AppError::BadRequest(format!("invalid parent for {}", kind)));
        }

        let columns = select_columns(kind);
        let row = match (kind, parent) {
            (EntityKind::Plant, _) => {
                sqlx::query_as::<_, EntityRow>(&format!(
                    "INSERT INTO plants (name) VALUES ($1) RETURNING {}",
                    columns
                ))
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await?
            }
            // 设备冗余保存所属区域与厂区
            (EntityKind::Asset, Some(sector)) => {
                sqlx::query_as::<_, EntityRow>(&format!(
                    r#"
                    INSERT INTO assets (sector_id, area_id, plant_id, name)
                    SELECT s.id, s.area_id, a.plant_id, $2
                    FROM sectors s
                    JOIN areas a ON a.id = s.area_id
                    WHERE s.id = $1
                    RETURNING {}
                    "#,
                    columns
                ))
                .bind(sector.id)
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await?
            }
            (_, Some(parent)) => {
                let column = parent_column(kind).unwrap_or("parent_id");
                sqlx::query_as::<_, EntityRow>(&format!(
                    r#"
                    INSERT INTO {table} ({column}, name)
                    SELECT id, $2 FROM {parent_table} WHERE id = $1
                    RETURNING {columns}
                    "#,
                    table = kind.plural(),
                    column = column,
                    parent_table = parent.kind.plural(),
                    columns = columns,
                ))
                .bind(parent.id)
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await?
            }
            (_, None) => None,
        };

        row.map(|r| r.into_entity(kind)).ok_or(AppError::NotFound)
    }

    async fn find_entity(&mut self, entity: EntityRef) -> Result<Option<Entity>, AppError> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            select_columns(entity.kind),
            entity.kind.plural()
        ))
        .bind(entity.id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|r| r.into_entity(entity.kind)))
    }

    async fn list_entities(&mut self, kind: EntityKind) -> Result<Vec<Entity>, AppError> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {} FROM {} ORDER BY id",
            select_columns(kind),
            kind.plural()
        ))
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_entity(kind)).collect())
    }

    async fn children_count(&mut self, entity: EntityRef) -> Result<i64, AppError> {
        let Some(child) = entity.kind.child_kind() else {
            return Ok(0);
        };
        let column = parent_column(child).unwrap_or("parent_id");

        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} = $1",
            child.plural(),
            column
        ))
        .bind(entity.id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count)
    }

    async fn delete_entity(&mut self, entity: EntityRef) -> Result<bool, AppError> {
        if self.children_count(entity).await? > 0 {
            return Err(AppError::HasChildren(format!("{} still has children", entity)));
        }

        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", entity.kind.plural()))
            .bind(entity.id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    AppError::HasChildren(format!("{} still has children", entity))
                }
                _ => AppError::Database(e),
            })?;

        Ok(result.rows_affected() > 0)
    }
}
