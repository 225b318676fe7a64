use std::time::Duration;

use chrono::Utc;
use log::*;
use payment_bridge_engine::{
    db_types::{PaymentConfirmation, PaymentOrder},
    events::EventProducers,
    traits::{MerchantManagement, OrderManagement},
    MerchantApi,
    OrderFlowApi,
    PaymentFlowError,
    SqliteDatabase,
};
use wxpay_tools::{OrderQueryResponse, WxPayGateway};

use crate::integrations::{wechat::parse_gateway_timestamp, WxPayGatewayFactory};

/// Starts the expired-order sweep. Do not await the returned JoinHandle, as it will run
/// indefinitely. This sweep is the correctness backstop for missed payment callbacks, so it runs
/// on a short cadence.
pub fn start_order_expiry_worker<G: WxPayGatewayFactory>(
    db: SqliteDatabase,
    producers: EventProducers,
    gateways: G,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        let orders = OrderFlowApi::new(db.clone(), producers);
        let merchants = MerchantApi::new(db);
        info!("🕰️ Expired-order sweep started. Running every {} s", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running expired-order sweep");
            match run_order_sweep(&orders, &merchants, &gateways).await {
                Ok(outcome) if outcome.scanned == 0 => trace!("🕰️ No expired orders to reconcile"),
                Ok(outcome) => info!("🕰️ Expired-order sweep done. {outcome}"),
                Err(e) => error!("🕰️ The expired-order sweep could not run. {e}"),
            }
        }
    })
}

/// What one pass of the expired-order sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OrderSweepOutcome {
    /// Expired INIT orders considered.
    pub scanned: usize,
    /// Orders the gateway reported as paid; the idempotent success transition was applied.
    pub settled: usize,
    /// Orders updated with a non-success gateway trade state. Their status stays INIT.
    pub refreshed: usize,
    /// Orders skipped because their merchant is missing or disabled.
    pub skipped: usize,
    /// Orders whose reconciliation failed. They stay in the population for the next pass.
    pub failed: usize,
}

impl std::fmt::Display for OrderSweepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned, {} settled, {} refreshed, {} skipped, {} failed",
            self.scanned, self.settled, self.refreshed, self.skipped, self.failed
        )
    }
}

enum Reconciliation {
    Settled,
    Refreshed,
    Skipped,
}

/// One pass over the INIT orders whose expiry time has passed. Each order is queried at the
/// gateway and the result committed before the next order is touched; a failure on one order is
/// logged and the sweep continues.
pub async fn run_order_sweep<B, G>(
    orders: &OrderFlowApi<B>,
    merchants: &MerchantApi<B>,
    gateways: &G,
) -> Result<OrderSweepOutcome, PaymentFlowError>
where
    B: OrderManagement + MerchantManagement,
    G: WxPayGatewayFactory,
{
    let expired = orders.expired_orders(Utc::now()).await?;
    let mut outcome = OrderSweepOutcome { scanned: expired.len(), ..Default::default() };
    for order in &expired {
        match reconcile_order(order, orders, merchants, gateways).await {
            Ok(Reconciliation::Settled) => outcome.settled += 1,
            Ok(Reconciliation::Refreshed) => outcome.refreshed += 1,
            Ok(Reconciliation::Skipped) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                warn!("🕰️ Could not reconcile order {}. The sweep continues. {e}", order.trade_no);
            },
        }
    }
    Ok(outcome)
}

async fn reconcile_order<B, G>(
    order: &PaymentOrder,
    orders: &OrderFlowApi<B>,
    merchants: &MerchantApi<B>,
    gateways: &G,
) -> Result<Reconciliation, PaymentFlowError>
where
    B: OrderManagement + MerchantManagement,
    G: WxPayGatewayFactory,
{
    let merchant = match merchants.merchant_by_id(order.merchant_id).await? {
        Some(merchant) if merchant.valid => merchant,
        Some(merchant) => {
            debug!("🕰️ Merchant {} is disabled. Skipping order {}", merchant.mch_id, order.trade_no);
            return Ok(Reconciliation::Skipped);
        },
        None => {
            warn!("🕰️ Order {} references merchant id {}, which no longer exists. Skipping it.", order.trade_no, order.merchant_id);
            return Ok(Reconciliation::Skipped);
        },
    };
    let gateway = gateways.gateway_for(&merchant)?;
    let response = gateway
        .query_order(order.trade_no.as_str())
        .await
        .map_err(|e| PaymentFlowError::Gateway(e.to_string()))?;
    if response.trade_state == "SUCCESS" {
        let confirmation = confirmation_from_query(&response);
        orders.confirm_payment(&order.trade_no, confirmation).await?;
        info!("🕰️ Order {} was paid after all; the callback never landed. Settled by the sweep.", order.trade_no);
        Ok(Reconciliation::Settled)
    } else {
        // An expired, still-unpaid order keeps its INIT status. FAILED is an operator action.
        orders
            .refresh_trade_state(&order.trade_no, &response.trade_state, response.transaction_id.as_deref())
            .await?;
        debug!("🕰️ Order {} is {} at the gateway", order.trade_no, response.trade_state);
        Ok(Reconciliation::Refreshed)
    }
}

fn confirmation_from_query(response: &OrderQueryResponse) -> PaymentConfirmation {
    PaymentConfirmation {
        transaction_id: response.transaction_id.clone(),
        trade_state: Some(response.trade_state.clone()),
        openid: response.payer.as_ref().map(|p| p.openid.clone()),
        amount: response.amount.as_ref().map(|a| a.total),
        success_time: response.success_time.as_deref().and_then(parse_gateway_timestamp).or_else(|| Some(Utc::now())),
    }
}
