//! Source server persistence.

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, keys, parse_uuid, to_millis, Store, StoreError};
use crate::model::SourceServer;

fn row_to_source_server(row: &AnyRow) -> Result<SourceServer, StoreError> {
    Ok(SourceServer {
        id: parse_uuid(row, "id")?,
        name: row.try_get("name")?,
        protocol: row.try_get("protocol")?,
        host: row.try_get("host")?,
        port: row.try_get::<i64, _>("port")? as u16,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

impl Store {
    pub async fn create_source_server(&self, server: &SourceServer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO source_servers (id, name, protocol, host, port, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(server.id.to_string())
        .bind(&server.name)
        .bind(&server.protocol)
        .bind(&server.host)
        .bind(server.port as i64)
        .bind(to_millis(server.created_at))
        .bind(to_millis(server.updated_at))
        .execute(self.pool())
        .await?;
        self.invalidate(
            &[
                keys::source_server(server.id),
                keys::LIST_SOURCE_SERVERS.to_string(),
                keys::server_options(server.id),
                keys::acl_options(server.id),
            ],
            &[],
        );
        Ok(())
    }

    pub async fn get_source_server(&self, id: Uuid) -> Result<SourceServer, StoreError> {
        self.cached(&keys::source_server(id), || async {
            let row = sqlx::query("SELECT * FROM source_servers WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            row_to_source_server(&row)
        })
        .await
    }

    pub async fn update_source_server(&self, server: &SourceServer) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE source_servers
             SET name = $1, protocol = $2, host = $3, port = $4, updated_at = $5
             WHERE id = $6",
        )
        .bind(&server.name)
        .bind(&server.protocol)
        .bind(&server.host)
        .bind(server.port as i64)
        .bind(to_millis(Utc::now()))
        .bind(server.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.invalidate(
            &[
                keys::source_server(server.id),
                keys::LIST_SOURCE_SERVERS.to_string(),
                keys::server_options(server.id),
                keys::acl_options(server.id),
            ],
            &[],
        );
        Ok(())
    }

    /// Deletes the source server and its 1:1 options rows.
    pub async fn delete_source_server(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM server_options WHERE source_id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM acl_options WHERE source_id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM source_servers WHERE id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        self.invalidate(
            &[
                keys::source_server(id),
                keys::LIST_SOURCE_SERVERS.to_string(),
                keys::server_options(id),
                keys::acl_options(id),
            ],
            &[],
        );
        Ok(())
    }

    pub async fn list_source_servers(&self) -> Result<Vec<SourceServer>, StoreError> {
        self.cached(keys::LIST_SOURCE_SERVERS, || async {
            let rows = sqlx::query("SELECT * FROM source_servers ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
            rows.iter().map(row_to_source_server).collect()
        })
        .await
    }
}
