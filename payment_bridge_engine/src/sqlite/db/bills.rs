use chrono::NaiveDate;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{BillCategory, BillRecord, NewBillRecord},
    traits::BillApiError,
};

pub async fn bill_exists(
    merchant_id: i64,
    bill_date: NaiveDate,
    category: BillCategory,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bill_records WHERE merchant_id = $1 AND bill_date = $2 AND category = $3",
    )
    .bind(merchant_id)
    .bind(bill_date)
    .bind(category)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

/// Inserts the record for a downloaded bill. The unique triple turns a duplicate insert into
/// [`BillApiError::BillAlreadyExists`] rather than a second row.
pub async fn insert_bill(bill: NewBillRecord, conn: &mut SqliteConnection) -> Result<BillRecord, BillApiError> {
    let result: Result<BillRecord, sqlx::Error> = sqlx::query_as(
        r#"
            INSERT INTO bill_records (merchant_id, bill_date, category, hash_type, hash_value, download_url, object_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(bill.merchant_id)
    .bind(bill.bill_date)
    .bind(bill.category)
    .bind(bill.hash_type)
    .bind(bill.hash_value)
    .bind(bill.download_url)
    .bind(bill.object_key)
    .fetch_one(conn)
    .await;
    match result {
        Ok(row) => {
            debug!("📝️ Bill record stored for merchant #{} on {} [{}]", row.merchant_id, row.bill_date, row.category);
            Ok(row)
        },
        Err(sqlx::Error::Database(de)) if de.is_unique_violation() => Err(BillApiError::BillAlreadyExists {
            merchant_id: bill.merchant_id,
            bill_date: bill.bill_date,
            category: bill.category,
        }),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_bills_for_merchant(
    merchant_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<BillRecord>, sqlx::Error> {
    let bills =
        sqlx::query_as("SELECT * FROM bill_records WHERE merchant_id = $1 ORDER BY bill_date DESC, category ASC")
            .bind(merchant_id)
            .fetch_all(conn)
            .await?;
    Ok(bills)
}
