//! Per-source-server options (TLS paths, ACL policy). Both are 1:1 rows
//! keyed by the source server id and written with upsert semantics.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, keys, parse_uuid, to_millis, Store, StoreError};
use crate::model::{AclOptions, ServerOptions};

impl Store {
    pub async fn get_server_options(&self, source_id: Uuid) -> Result<ServerOptions, StoreError> {
        self.cached(&keys::server_options(source_id), || async {
            let row = sqlx::query("SELECT * FROM server_options WHERE source_id = $1")
                .bind(source_id.to_string())
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            Ok(ServerOptions {
                source_id: parse_uuid(&row, "source_id")?,
                tls_cert_path: row.try_get("tls_cert_path")?,
                tls_key_path: row.try_get("tls_key_path")?,
                created_at: from_millis(row.try_get("created_at")?),
                updated_at: from_millis(row.try_get("updated_at")?),
            })
        })
        .await
    }

    pub async fn set_server_options(&self, opts: &ServerOptions) -> Result<(), StoreError> {
        let now = to_millis(Utc::now());
        let updated = sqlx::query(
            "UPDATE server_options SET tls_cert_path = $1, tls_key_path = $2, updated_at = $3
             WHERE source_id = $4",
        )
        .bind(&opts.tls_cert_path)
        .bind(&opts.tls_key_path)
        .bind(now)
        .bind(opts.source_id.to_string())
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO server_options (source_id, tls_cert_path, tls_key_path, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(opts.source_id.to_string())
            .bind(&opts.tls_cert_path)
            .bind(&opts.tls_key_path)
            .bind(now)
            .bind(now)
            .execute(self.pool())
            .await?;
        }
        self.invalidate(&[keys::server_options(opts.source_id)], &[]);
        Ok(())
    }

    pub async fn get_acl_options(&self, source_id: Uuid) -> Result<AclOptions, StoreError> {
        self.cached(&keys::acl_options(source_id), || async {
            let row = sqlx::query("SELECT * FROM acl_options WHERE source_id = $1")
                .bind(source_id.to_string())
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            let allow_json: String = row.try_get("allow_list")?;
            let deny_json: String = row.try_get("deny_list")?;
            Ok(AclOptions {
                source_id: parse_uuid(&row, "source_id")?,
                mode: row.try_get("mode")?,
                client_ip_header: row.try_get("client_ip_header")?,
                allow_list: serde_json::from_str(&allow_json).unwrap_or_default(),
                deny_list: serde_json::from_str(&deny_json).unwrap_or_default(),
                created_at: from_millis(row.try_get("created_at")?),
                updated_at: from_millis(row.try_get("updated_at")?),
            })
        })
        .await
    }

    pub async fn set_acl_options(&self, opts: &AclOptions) -> Result<(), StoreError> {
        let now = to_millis(Utc::now());
        let allow_json =
            serde_json::to_string(&opts.allow_list).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let deny_json =
            serde_json::to_string(&opts.deny_list).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let updated = sqlx::query(
            "UPDATE acl_options
             SET mode = $1, client_ip_header = $2, allow_list = $3, deny_list = $4, updated_at = $5
             WHERE source_id = $6",
        )
        .bind(&opts.mode)
        .bind(&opts.client_ip_header)
        .bind(&allow_json)
        .bind(&deny_json)
        .bind(now)
        .bind(opts.source_id.to_string())
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO acl_options (source_id, mode, client_ip_header, allow_list, deny_list, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(opts.source_id.to_string())
            .bind(&opts.mode)
            .bind(&opts.client_ip_header)
            .bind(&allow_json)
            .bind(&deny_json)
            .bind(now)
            .bind(now)
            .execute(self.pool())
            .await?;
        }
        self.invalidate(&[keys::acl_options(opts.source_id)], &[]);
        Ok(())
    }
}
