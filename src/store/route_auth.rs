//! Route ↔ credential mappings.

use sqlx::Row;
use uuid::Uuid;

use super::{keys, parse_uuid, Store, StoreError};
use crate::model::{Authentication, RouteSourceAuth};

impl Store {
    /// The ordered list of credentials a client may present on this route.
    pub async fn list_source_auths_for_route(
        &self,
        route_id: Uuid,
    ) -> Result<Vec<RouteSourceAuth>, StoreError> {
        self.cached(&keys::route_source_auths(route_id), || async {
            let rows = sqlx::query(
                "SELECT route_id, auth_id, position FROM route_source_auths
                 WHERE route_id = $1 ORDER BY position",
            )
            .bind(route_id.to_string())
            .fetch_all(self.pool())
            .await?;
            rows.iter()
                .map(|row| {
                    Ok(RouteSourceAuth {
                        route_id: parse_uuid(row, "route_id")?,
                        auth_id: parse_uuid(row, "auth_id")?,
                        position: row.try_get::<i64, _>("position")? as i32,
                    })
                })
                .collect()
        })
        .await
    }

    /// Replaces the route's allowed credential list.
    pub async fn set_source_auths_for_route(
        &self,
        route_id: Uuid,
        auth_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM route_source_auths WHERE route_id = $1")
            .bind(route_id.to_string())
            .execute(self.pool())
            .await?;
        for (position, auth_id) in auth_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO route_source_auths (route_id, auth_id, position) VALUES ($1, $2, $3)",
            )
            .bind(route_id.to_string())
            .bind(auth_id.to_string())
            .bind(position as i64)
            .execute(self.pool())
            .await?;
        }
        self.invalidate(&[keys::route_source_auths(route_id)], &[]);
        Ok(())
    }

    /// The credential id injected on upstream calls, if configured.
    ///
    /// Absence is a cacheable result, not an error.
    pub async fn get_target_auth_for_route(
        &self,
        route_id: Uuid,
    ) -> Result<Option<Uuid>, StoreError> {
        self.cached(&keys::target_auth_for_route(route_id), || async {
            let row = sqlx::query("SELECT auth_id FROM route_target_auths WHERE route_id = $1")
                .bind(route_id.to_string())
                .fetch_optional(self.pool())
                .await?;
            match row {
                Some(row) => Ok(Some(parse_uuid(&row, "auth_id")?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Sets or clears the route's upstream credential.
    pub async fn set_target_auth_for_route(
        &self,
        route_id: Uuid,
        auth_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM route_target_auths WHERE route_id = $1")
            .bind(route_id.to_string())
            .execute(self.pool())
            .await?;
        if let Some(auth_id) = auth_id {
            sqlx::query("INSERT INTO route_target_auths (route_id, auth_id) VALUES ($1, $2)")
                .bind(route_id.to_string())
                .bind(auth_id.to_string())
                .execute(self.pool())
                .await?;
        }
        self.invalidate(&[keys::target_auth_for_route(route_id)], &[]);
        Ok(())
    }

    /// The route's upstream credential with the token decrypted. Not cached.
    pub async fn get_target_authentication_with_plain_token(
        &self,
        route_id: Uuid,
    ) -> Result<Option<Authentication>, StoreError> {
        let auth_id = match self.get_target_auth_for_route(route_id).await? {
            Some(id) => id,
            None => return Ok(None),
        };
        let auth = self.get_authentication_with_plain_token(auth_id).await?;
        Ok(Some(auth))
    }
}
