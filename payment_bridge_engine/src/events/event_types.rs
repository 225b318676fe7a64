use crate::db_types::{PaymentConfirmation, PaymentOrder, RefundOrder};

/// Emitted exactly once per actual INIT → SUCCESS transition of a payment order. Absorbed
/// redeliveries and reconciliation no-ops do not fire it.
#[derive(Debug, Clone)]
pub struct PaymentSucceededEvent {
    pub order: PaymentOrder,
    pub confirmation: PaymentConfirmation,
}

impl PaymentSucceededEvent {
    pub fn new(order: PaymentOrder, confirmation: PaymentConfirmation) -> Self {
        Self { order, confirmation }
    }
}

/// Emitted exactly once, when a refund order first reaches SUCCESS.
#[derive(Debug, Clone)]
pub struct RefundSucceededEvent {
    pub refund: RefundOrder,
}

impl RefundSucceededEvent {
    pub fn new(refund: RefundOrder) -> Self {
        Self { refund }
    }
}
