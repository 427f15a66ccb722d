//! Route persistence and lookup.

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, keys, parse_uuid, to_millis, Store, StoreError};
use crate::model::{protocols_compatible, Route};

fn row_to_route(row: &AnyRow) -> Result<Route, StoreError> {
    Ok(Route {
        id: parse_uuid(row, "id")?,
        source_id: parse_uuid(row, "source_id")?,
        target_id: parse_uuid(row, "target_id")?,
        method: row.try_get("method")?,
        source_path: row.try_get("source_path")?,
        target_path: row.try_get("target_path")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

/// Scalar and composite keys dropped on any route mutation. The `route:`
/// prefix covers the method/path and source/target path composite families.
fn route_invalidation(id: Uuid) -> Vec<String> {
    vec![
        keys::route(id),
        keys::LIST_ROUTES.to_string(),
        keys::route_source_auths(id),
        keys::target_auth_for_route(id),
    ]
}

impl Store {
    /// Verifies the linked servers exist and their protocols are compatible.
    async fn check_route_link(&self, route: &Route) -> Result<(), StoreError> {
        let source = self.get_source_server(route.source_id).await?;
        let target = self.get_target_server(route.target_id).await?;
        if !protocols_compatible(&source.protocol, &target.protocol) {
            return Err(StoreError::ProtocolMismatch);
        }
        Ok(())
    }

    pub async fn create_route(&self, route: &Route) -> Result<(), StoreError> {
        self.check_route_link(route).await?;
        sqlx::query(
            "INSERT INTO routes (id, source_id, target_id, method, source_path, target_path, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(route.id.to_string())
        .bind(route.source_id.to_string())
        .bind(route.target_id.to_string())
        .bind(&route.method)
        .bind(&route.source_path)
        .bind(&route.target_path)
        .bind(to_millis(route.created_at))
        .bind(to_millis(route.updated_at))
        .execute(self.pool())
        .await?;
        self.invalidate(&route_invalidation(route.id), &[keys::PREFIX_ROUTE]);
        Ok(())
    }

    pub async fn get_route(&self, id: Uuid) -> Result<Route, StoreError> {
        self.cached(&keys::route(id), || async {
            let row = sqlx::query("SELECT * FROM routes WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            row_to_route(&row)
        })
        .await
    }

    pub async fn update_route(&self, route: &Route) -> Result<(), StoreError> {
        self.check_route_link(route).await?;
        let result = sqlx::query(
            "UPDATE routes
             SET source_id = $1, target_id = $2, method = $3, source_path = $4, target_path = $5, updated_at = $6
             WHERE id = $7",
        )
        .bind(route.source_id.to_string())
        .bind(route.target_id.to_string())
        .bind(&route.method)
        .bind(&route.source_path)
        .bind(&route.target_path)
        .bind(to_millis(Utc::now()))
        .bind(route.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.invalidate(&route_invalidation(route.id), &[keys::PREFIX_ROUTE]);
        Ok(())
    }

    /// Deletes the route and its source/target auth mappings.
    pub async fn delete_route(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM route_source_auths WHERE route_id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM route_target_auths WHERE route_id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM routes WHERE id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        self.invalidate(&route_invalidation(id), &[keys::PREFIX_ROUTE]);
        Ok(())
    }

    pub async fn list_routes(&self) -> Result<Vec<Route>, StoreError> {
        self.cached(keys::LIST_ROUTES, || async {
            let rows = sqlx::query("SELECT * FROM routes ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
            rows.iter().map(row_to_route).collect()
        })
        .await
    }

    /// The data-plane lookup: exactly one route per `(source, method, path)`.
    pub async fn find_route_by_source_method_path(
        &self,
        source_id: Uuid,
        method: &str,
        source_path: &str,
    ) -> Result<Route, StoreError> {
        self.cached(
            &keys::route_method_path(source_id, method, source_path),
            || async {
                let row = sqlx::query(
                    "SELECT * FROM routes WHERE source_id = $1 AND method = $2 AND source_path = $3",
                )
                .bind(source_id.to_string())
                .bind(method)
                .bind(source_path)
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
                row_to_route(&row)
            },
        )
        .await
    }

    pub async fn get_route_from_source_path(&self, source_path: &str) -> Result<Route, StoreError> {
        self.cached(&keys::route_source_path(source_path), || async {
            let row = sqlx::query("SELECT * FROM routes WHERE source_path = $1")
                .bind(source_path)
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            row_to_route(&row)
        })
        .await
    }

    pub async fn get_route_from_target_path(&self, target_path: &str) -> Result<Route, StoreError> {
        self.cached(&keys::route_target_path(target_path), || async {
            let row = sqlx::query("SELECT * FROM routes WHERE target_path = $1")
                .bind(target_path)
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            row_to_route(&row)
        })
        .await
    }
}
