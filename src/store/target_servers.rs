//! Target server persistence.

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, keys, parse_uuid, to_millis, Store, StoreError};
use crate::model::TargetServer;

fn row_to_target_server(row: &AnyRow) -> Result<TargetServer, StoreError> {
    Ok(TargetServer {
        id: parse_uuid(row, "id")?,
        name: row.try_get("name")?,
        protocol: row.try_get("protocol")?,
        host: row.try_get("host")?,
        port: row.try_get::<i64, _>("port")? as u16,
        base_path: row.try_get("base_path")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

impl Store {
    pub async fn create_target_server(&self, server: &TargetServer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO target_servers (id, name, protocol, host, port, base_path, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(server.id.to_string())
        .bind(&server.name)
        .bind(&server.protocol)
        .bind(&server.host)
        .bind(server.port as i64)
        .bind(&server.base_path)
        .bind(to_millis(server.created_at))
        .bind(to_millis(server.updated_at))
        .execute(self.pool())
        .await?;
        self.invalidate(
            &[
                keys::target_server(server.id),
                keys::LIST_TARGET_SERVERS.to_string(),
            ],
            &[],
        );
        Ok(())
    }

    pub async fn get_target_server(&self, id: Uuid) -> Result<TargetServer, StoreError> {
        self.cached(&keys::target_server(id), || async {
            let row = sqlx::query("SELECT * FROM target_servers WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            row_to_target_server(&row)
        })
        .await
    }

    pub async fn update_target_server(&self, server: &TargetServer) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE target_servers
             SET name = $1, protocol = $2, host = $3, port = $4, base_path = $5, updated_at = $6
             WHERE id = $7",
        )
        .bind(&server.name)
        .bind(&server.protocol)
        .bind(&server.host)
        .bind(server.port as i64)
        .bind(&server.base_path)
        .bind(to_millis(Utc::now()))
        .bind(server.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.invalidate(
            &[
                keys::target_server(server.id),
                keys::LIST_TARGET_SERVERS.to_string(),
            ],
            &[],
        );
        Ok(())
    }

    pub async fn delete_target_server(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM target_servers WHERE id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        self.invalidate(
            &[
                keys::target_server(id),
                keys::LIST_TARGET_SERVERS.to_string(),
            ],
            &[],
        );
        Ok(())
    }

    pub async fn list_target_servers(&self) -> Result<Vec<TargetServer>, StoreError> {
        self.cached(keys::LIST_TARGET_SERVERS, || async {
            let rows = sqlx::query("SELECT * FROM target_servers ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
            rows.iter().map(row_to_target_server).collect()
        })
        .await
    }
}
