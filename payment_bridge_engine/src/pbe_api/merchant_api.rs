use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{Merchant, NewMerchant},
    pbe_api::errors::PaymentFlowError,
    traits::MerchantManagement,
};

/// `MerchantApi` handles provisioning and lookup of gateway merchant accounts.
pub struct MerchantApi<B> {
    db: B,
}

impl<B: Debug> Debug for MerchantApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MerchantApi ({:?})", self.db)
    }
}

impl<B> MerchantApi<B>
where B: MerchantManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Registers a merchant, or rotates the credentials of an existing one.
    pub async fn register_merchant(&self, merchant: NewMerchant) -> Result<Merchant, PaymentFlowError> {
        let merchant = self.db.upsert_merchant(merchant).await?;
        info!("🔐️ Merchant {} ({}) configured", merchant.mch_id, merchant.app_id);
        Ok(merchant)
    }

    pub async fn merchant_by_mch_id(&self, mch_id: &str) -> Result<Option<Merchant>, PaymentFlowError> {
        let merchant = self.db.fetch_merchant_by_mch_id(mch_id).await?;
        Ok(merchant)
    }

    pub async fn merchant_by_id(&self, id: i64) -> Result<Option<Merchant>, PaymentFlowError> {
        let merchant = self.db.fetch_merchant_by_id(id).await?;
        Ok(merchant)
    }

    /// Resolves the merchant a request should run under. A named merchant must exist; with no
    /// name, the most recently configured valid merchant is used.
    pub async fn resolve_merchant(&self, mch_id: Option<&str>) -> Result<Merchant, PaymentFlowError> {
        let merchant = match mch_id {
            Some(id) => self.db.fetch_merchant_by_mch_id(id).await?,
            None => self.db.fetch_default_merchant().await?,
        };
        merchant.ok_or_else(|| PaymentFlowError::MerchantNotFound(mch_id.unwrap_or("<default>").to_string()))
    }

    pub async fn valid_merchants(&self) -> Result<Vec<Merchant>, PaymentFlowError> {
        let merchants = self.db.fetch_valid_merchants().await?;
        Ok(merchants)
    }

    pub async fn set_validity(&self, mch_id: &str, valid: bool) -> Result<Merchant, PaymentFlowError> {
        let merchant = self.db.set_merchant_validity(mch_id, valid).await?;
        info!("🔐️ Merchant {} is now {}", merchant.mch_id, if valid { "valid" } else { "disabled" });
        Ok(merchant)
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
