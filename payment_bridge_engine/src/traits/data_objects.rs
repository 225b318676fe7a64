use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The gateway's view of a refund, as applied onto a stored refund order. Every field is
/// optional: a query or callback only updates what it actually carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundUpdate {
    pub refund_id: Option<String>,
    pub channel: Option<String>,
    pub user_received_account: Option<String>,
    pub success_time: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

impl RefundUpdate {
    pub fn with_status<S: Into<String>>(mut self, status: S) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_refund_id<S: Into<String>>(mut self, refund_id: S) -> Self {
        self.refund_id = Some(refund_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.refund_id.is_none() &&
            self.channel.is_none() &&
            self.user_received_account.is_none() &&
            self.success_time.is_none() &&
            self.status.is_none()
    }
}
