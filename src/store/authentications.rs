//! Authentication credential persistence.
//!
//! Stored tokens are AEAD ciphertext plus a per-record nonce. Cached reads
//! carry only a masked placeholder; plaintext reads go straight to the
//! database and the codec, never through the cache.

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, keys, parse_uuid, to_millis, Store, StoreError};
use crate::crypto::{decrypt_token, encrypt_token};
use crate::model::Authentication;

const TOKEN_MASKED: &str = "***";

fn row_to_authentication(row: &AnyRow) -> Result<Authentication, StoreError> {
    Ok(Authentication {
        id: parse_uuid(row, "id")?,
        name: row.try_get("name")?,
        token_type: row.try_get("token_type")?,
        token: String::new(),
        token_masked: String::new(),
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

impl Store {
    /// Creates a credential. `auth.token` must be the non-empty plaintext; it
    /// is encrypted before the insert and never stored in clear.
    pub async fn create_authentication(&self, auth: &Authentication) -> Result<(), StoreError> {
        if auth.token.is_empty() {
            return Err(StoreError::TokenRequired);
        }
        let (ciphertext, nonce) = encrypt_token(&auth.token)?;
        sqlx::query(
            "INSERT INTO authentications (id, name, token_type, token_ciphertext, token_nonce, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(auth.id.to_string())
        .bind(&auth.name)
        .bind(&auth.token_type)
        .bind(ciphertext)
        .bind(nonce)
        .bind(to_millis(auth.created_at))
        .bind(to_millis(auth.updated_at))
        .execute(self.pool())
        .await?;
        self.invalidate(
            &[keys::auth(auth.id), keys::LIST_AUTHENTICATIONS.to_string()],
            &[],
        );
        Ok(())
    }

    /// Cached read with the token masked.
    pub async fn get_authentication(&self, id: Uuid) -> Result<Authentication, StoreError> {
        self.cached(&keys::auth(id), || async {
            let row = sqlx::query("SELECT * FROM authentications WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?
                .ok_or(StoreError::NotFound)?;
            let mut auth = row_to_authentication(&row)?;
            auth.token_masked = TOKEN_MASKED.to_string();
            Ok(auth)
        })
        .await
    }

    /// Plaintext read for the proxy path. Not cached.
    pub async fn get_authentication_with_plain_token(
        &self,
        id: Uuid,
    ) -> Result<Authentication, StoreError> {
        let row = sqlx::query("SELECT * FROM authentications WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        let ciphertext: String = row.try_get("token_ciphertext")?;
        let nonce: String = row.try_get("token_nonce")?;
        let mut auth = row_to_authentication(&row)?;
        auth.token = decrypt_token(&ciphertext, &nonce)?;
        Ok(auth)
    }

    /// Updates name and token type; a non-empty `auth.token` re-encrypts the
    /// stored credential, an empty one keeps it.
    pub async fn update_authentication(&self, auth: &Authentication) -> Result<(), StoreError> {
        let result = if auth.token.is_empty() {
            sqlx::query(
                "UPDATE authentications SET name = $1, token_type = $2, updated_at = $3 WHERE id = $4",
            )
            .bind(&auth.name)
            .bind(&auth.token_type)
            .bind(to_millis(Utc::now()))
            .bind(auth.id.to_string())
            .execute(self.pool())
            .await?
        } else {
            let (ciphertext, nonce) = encrypt_token(&auth.token)?;
            sqlx::query(
                "UPDATE authentications
                 SET name = $1, token_type = $2, token_ciphertext = $3, token_nonce = $4, updated_at = $5
                 WHERE id = $6",
            )
            .bind(&auth.name)
            .bind(&auth.token_type)
            .bind(ciphertext)
            .bind(nonce)
            .bind(to_millis(Utc::now()))
            .bind(auth.id.to_string())
            .execute(self.pool())
            .await?
        };
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.invalidate(
            &[keys::auth(auth.id), keys::LIST_AUTHENTICATIONS.to_string()],
            &[keys::PREFIX_TARGET_AUTH_FOR_ROUTE],
        );
        Ok(())
    }

    /// Deletes the credential and every route mapping that references it.
    pub async fn delete_authentication(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM route_source_auths WHERE auth_id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM route_target_auths WHERE auth_id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM authentications WHERE id = $1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        self.invalidate(
            &[keys::auth(id), keys::LIST_AUTHENTICATIONS.to_string()],
            &[
                keys::PREFIX_TARGET_AUTH_FOR_ROUTE,
                keys::PREFIX_ROUTE_SOURCE_AUTHS,
            ],
        );
        Ok(())
    }

    pub async fn list_authentications(&self) -> Result<Vec<Authentication>, StoreError> {
        self.cached(keys::LIST_AUTHENTICATIONS, || async {
            let rows = sqlx::query("SELECT * FROM authentications ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
            rows.iter()
                .map(|row| {
                    let mut auth = row_to_authentication(row)?;
                    auth.token_masked = TOKEN_MASKED.to_string();
                    Ok(auth)
                })
                .collect()
        })
        .await
    }
}
