use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Merchant, NewMerchant},
    traits::MerchantApiError,
};

/// Inserts the merchant, or rotates the stored credentials when the `mch_id` is already known.
pub async fn upsert_merchant(merchant: NewMerchant, conn: &mut SqliteConnection) -> Result<Merchant, MerchantApiError> {
    let row: Merchant = sqlx::query_as(
        r#"
            INSERT INTO merchants (mch_id, app_id, api_key, serial_no, private_key_pem, platform_cert_pem, valid)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (mch_id) DO UPDATE SET
                app_id = excluded.app_id,
                api_key = excluded.api_key,
                serial_no = excluded.serial_no,
                private_key_pem = excluded.private_key_pem,
                platform_cert_pem = excluded.platform_cert_pem,
                valid = excluded.valid,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
    )
    .bind(merchant.mch_id)
    .bind(merchant.app_id)
    .bind(merchant.api_key)
    .bind(merchant.serial_no)
    .bind(merchant.private_key_pem)
    .bind(merchant.platform_cert_pem)
    .bind(merchant.valid)
    .fetch_one(conn)
    .await?;
    debug!("📝️ Merchant [{}] stored with id {}", row.mch_id, row.id);
    Ok(row)
}

pub async fn fetch_merchant_by_mch_id(
    mch_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Merchant>, sqlx::Error> {
    let merchant =
        sqlx::query_as("SELECT * FROM merchants WHERE mch_id = $1").bind(mch_id).fetch_optional(conn).await?;
    Ok(merchant)
}

pub async fn fetch_merchant_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Merchant>, sqlx::Error> {
    let merchant = sqlx::query_as("SELECT * FROM merchants WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(merchant)
}

/// The most recently configured valid merchant. Used when a caller does not name one explicitly.
pub async fn fetch_default_merchant(conn: &mut SqliteConnection) -> Result<Option<Merchant>, sqlx::Error> {
    let merchant =
        sqlx::query_as("SELECT * FROM merchants WHERE valid = 1 ORDER BY updated_at DESC, id DESC LIMIT 1")
            .fetch_optional(conn)
            .await?;
    Ok(merchant)
}

pub async fn fetch_valid_merchants(conn: &mut SqliteConnection) -> Result<Vec<Merchant>, sqlx::Error> {
    let merchants =
        sqlx::query_as("SELECT * FROM merchants WHERE valid = 1 ORDER BY id ASC").fetch_all(conn).await?;
    Ok(merchants)
}

pub async fn set_merchant_validity(
    mch_id: &str,
    valid: bool,
    conn: &mut SqliteConnection,
) -> Result<Merchant, MerchantApiError> {
    sqlx::query_as("UPDATE merchants SET valid = $1, updated_at = CURRENT_TIMESTAMP WHERE mch_id = $2 RETURNING *")
        .bind(valid)
        .bind(mch_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| MerchantApiError::MerchantNotFound(mch_id.to_string()))
}
