use std::fmt::Debug;

use chrono::NaiveDate;
use log::*;

use crate::{
    db_types::{BillCategory, BillRecord, NewBillRecord},
    pbe_api::errors::PaymentFlowError,
    traits::BillManagement,
};

/// `BillApi` tracks which settlement bills have been downloaded and archived.
pub struct BillApi<B> {
    db: B,
}

impl<B: Debug> Debug for BillApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BillApi ({:?})", self.db)
    }
}

impl<B> BillApi<B>
where B: BillManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Whether the bill for this `(merchant, date, category)` triple has already been archived.
    pub async fn bill_exists(
        &self,
        merchant_id: i64,
        bill_date: NaiveDate,
        category: BillCategory,
    ) -> Result<bool, PaymentFlowError> {
        let exists = self.db.bill_exists(merchant_id, bill_date, category).await?;
        Ok(exists)
    }

    /// Records a freshly-archived bill. The record is only written after the bill bytes are
    /// safely in the object store, so a stored record implies a stored bill.
    pub async fn record_bill(&self, bill: NewBillRecord) -> Result<BillRecord, PaymentFlowError> {
        let bill = self.db.insert_bill(bill).await?;
        info!("🧾️ Bill for merchant #{} on {} ({}) archived", bill.merchant_id, bill.bill_date, bill.category);
        Ok(bill)
    }

    pub async fn bills_for_merchant(&self, merchant_id: i64) -> Result<Vec<BillRecord>, PaymentFlowError> {
        let bills = self.db.fetch_bills_for_merchant(merchant_id).await?;
        Ok(bills)
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
