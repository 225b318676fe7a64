use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{PaymentOrderStatus, TradeNo, TradeType},
    traits::OrderApiError,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderQueryFilter {
    pub trade_no: Option<TradeNo>,
    pub transaction_id: Option<String>,
    pub merchant_id: Option<i64>,
    pub openid: Option<String>,
    pub currency: Option<String>,
    pub trade_type: Option<TradeType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: Option<Vec<PaymentOrderStatus>>,
}

impl OrderQueryFilter {
    pub fn with_trade_no(mut self, trade_no: TradeNo) -> Self {
        self.trade_no = Some(trade_no);
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: String) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_merchant_id(mut self, merchant_id: i64) -> Self {
        self.merchant_id = Some(merchant_id);
        self
    }

    pub fn with_openid(mut self, openid: String) -> Self {
        self.openid = Some(openid);
        self
    }

    pub fn with_currency(mut self, currency: String) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn with_trade_type(mut self, trade_type: TradeType) -> Self {
        self.trade_type = Some(trade_type);
        self
    }

    pub fn since<T>(mut self, since: T) -> Result<Self, OrderApiError>
    where
        T: TryInto<DateTime<Utc>>,
        T::Error: Display,
    {
        let dt = since.try_into().map_err(|e| OrderApiError::QueryError(e.to_string()))?;
        self.since = Some(dt);
        Ok(self)
    }

    pub fn until<T>(mut self, until: T) -> Result<Self, OrderApiError>
    where
        T: TryInto<DateTime<Utc>>,
        T::Error: Display,
    {
        let dt = until.try_into().map_err(|e| OrderApiError::QueryError(e.to_string()))?;
        self.until = Some(dt);
        Ok(self)
    }

    pub fn with_status(mut self, status: PaymentOrderStatus) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.trade_no.is_none() &&
            self.transaction_id.is_none() &&
            self.merchant_id.is_none() &&
            self.openid.is_none() &&
            self.currency.is_none() &&
            self.trade_type.is_none() &&
            self.status.is_none() &&
            self.since.is_none() &&
            self.until.is_none()
    }
}
