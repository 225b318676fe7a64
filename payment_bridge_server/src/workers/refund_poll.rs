use std::time::Duration;

use log::*;
use payment_bridge_engine::{
    db_types::{refund_status, RefundOrder},
    events::EventProducers,
    traits::{MerchantManagement, OrderManagement, RefundManagement},
    MerchantApi,
    PaymentFlowError,
    RefundFlowApi,
    SqliteDatabase,
};
use wxpay_tools::{WxPayApiError, WxPayGateway};

use crate::integrations::{wechat::refund_update_from_response, WxPayGatewayFactory};

/// Starts the refund status sweep. Do not await the returned JoinHandle, as it will run
/// indefinitely.
pub fn start_refund_poll_worker<G: WxPayGatewayFactory>(
    db: SqliteDatabase,
    producers: EventProducers,
    gateways: G,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        let refunds = RefundFlowApi::new(db.clone(), producers);
        let merchants = MerchantApi::new(db);
        info!("🕰️ Refund status sweep started. Running every {} s", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running refund status sweep");
            match run_refund_sweep(&refunds, &merchants, &gateways).await {
                Ok(outcome) if outcome.scanned == 0 => trace!("🕰️ No processing refunds to poll"),
                Ok(outcome) => info!("🕰️ Refund status sweep done. {outcome}"),
                Err(e) => error!("🕰️ The refund status sweep could not run. {e}"),
            }
        }
    })
}

/// What one pass of the refund status sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefundSweepOutcome {
    /// PROCESSING refunds polled.
    pub scanned: usize,
    /// Refunds that reached SUCCESS on this pass.
    pub settled: usize,
    /// Refunds updated from the gateway response but still in flight.
    pub updated: usize,
    /// Refunds forced to CLOSED because the gateway has no record of them.
    pub closed: usize,
    /// Refunds skipped because their merchant is missing or disabled.
    pub skipped: usize,
    /// Refunds whose poll failed. They stay in the population for the next pass.
    pub failed: usize,
}

impl std::fmt::Display for RefundSweepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned, {} settled, {} updated, {} closed, {} skipped, {} failed",
            self.scanned, self.settled, self.updated, self.closed, self.skipped, self.failed
        )
    }
}

enum RefundPoll {
    Settled,
    Updated,
    Closed,
    Skipped,
}

/// One pass over the refunds still in PROCESSING. Each refund is queried at the gateway and the
/// result committed before the next one is touched; a failure on one refund is logged and the
/// sweep continues. A refund leaves the population the moment its stored status is terminal.
pub async fn run_refund_sweep<B, G>(
    refunds: &RefundFlowApi<B>,
    merchants: &MerchantApi<B>,
    gateways: &G,
) -> Result<RefundSweepOutcome, PaymentFlowError>
where
    B: RefundManagement + OrderManagement + MerchantManagement,
    G: WxPayGatewayFactory,
{
    let processing = refunds.processing_refunds().await?;
    let mut outcome = RefundSweepOutcome { scanned: processing.len(), ..Default::default() };
    for refund in &processing {
        match poll_refund(refund, refunds, merchants, gateways).await {
            Ok(RefundPoll::Settled) => outcome.settled += 1,
            Ok(RefundPoll::Updated) => outcome.updated += 1,
            Ok(RefundPoll::Closed) => outcome.closed += 1,
            Ok(RefundPoll::Skipped) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                warn!("🕰️ Could not poll refund {}. The sweep continues. {e}", refund.refund_no);
            },
        }
    }
    Ok(outcome)
}

async fn poll_refund<B, G>(
    refund: &RefundOrder,
    refunds: &RefundFlowApi<B>,
    merchants: &MerchantApi<B>,
    gateways: &G,
) -> Result<RefundPoll, PaymentFlowError>
where
    B: RefundManagement + OrderManagement + MerchantManagement,
    G: WxPayGatewayFactory,
{
    let merchant = match merchants.merchant_by_id(refund.merchant_id).await? {
        Some(merchant) if merchant.valid => merchant,
        Some(merchant) => {
            debug!("🕰️ Merchant {} is disabled. Skipping refund {}", merchant.mch_id, refund.refund_no);
            return Ok(RefundPoll::Skipped);
        },
        None => {
            warn!(
                "🕰️ Refund {} references merchant id {}, which no longer exists. Skipping it.",
                refund.refund_no, refund.merchant_id
            );
            return Ok(RefundPoll::Skipped);
        },
    };
    let gateway = gateways.gateway_for(&merchant)?;
    let response = match gateway.query_refund(refund.refund_no.as_str()).await {
        Ok(response) => response,
        // The gateway has no record of this refund, so there is nothing to keep polling for.
        Err(WxPayApiError::QueryError { status: 404, .. }) => {
            warn!("🕰️ The gateway has no record of refund {}. Closing it.", refund.refund_no);
            refunds.close_refund(&refund.refund_no).await?;
            return Ok(RefundPoll::Closed);
        },
        Err(e) => return Err(PaymentFlowError::Gateway(e.to_string())),
    };
    let snapshot = serde_json::to_string(&response).unwrap_or_default();
    refunds.record_gateway_response(&refund.refund_no, &snapshot).await?;
    if response.refund_id.is_none() {
        warn!("🕰️ The status response for refund {} carries no gateway refund id. Closing it.", refund.refund_no);
        refunds.close_refund(&refund.refund_no).await?;
        return Ok(RefundPoll::Closed);
    }
    let update = refund_update_from_response(&response);
    let refund = refunds.apply_update(&refund.refund_no, update).await?;
    if refund.status == refund_status::SUCCESS {
        Ok(RefundPoll::Settled)
    } else {
        debug!("🕰️ Refund {} is {} at the gateway", refund.refund_no, refund.status);
        Ok(RefundPoll::Updated)
    }
}

#[cfg(test)]
mod test {
    use payment_bridge_engine::db_types::RefundNo;

    use super::*;
    use crate::endpoint_tests::mocks::{
        merchant_fixture,
        refund_fixture,
        refund_response_fixture,
        MockBridge,
        MockGateway,
        MockGatewayFactory,
    };

    #[tokio::test]
    async fn settling_refunds_get_the_full_field_map() {
        let refund_no = RefundNo("RWPB2026082300001".into());
        let mut refund_db = MockBridge::new();
        let refund = refund_fixture(&refund_no, 1, refund_status::PROCESSING);
        let returned = refund.clone();
        refund_db.expect_fetch_processing_refunds().return_once(move || Ok(vec![returned]));
        let recorded = refund.clone();
        refund_db.expect_record_refund_response().return_once(move |_, _| Ok(recorded));
        let fetched = refund.clone();
        refund_db.expect_fetch_refund_by_refund_no().return_once(move |_| Ok(Some(fetched)));
        let mut settled = refund.clone();
        settled.status = refund_status::SUCCESS.to_string();
        settled.refund_id = Some("50300807092026".into());
        let expected = refund_no.clone();
        refund_db
            .expect_apply_refund_update()
            .withf(move |no, update| no == &expected && update.refund_id.as_deref() == Some("50300807092026"))
            .return_once(move |_, _| Ok(settled));
        refund_db.expect_close_refund().never();
        let mut merchant_db = MockBridge::new();
        merchant_db.expect_fetch_merchant_by_id().return_once(|_| Ok(Some(merchant_fixture(1))));
        let mut gateway = MockGateway::new();
        gateway.expect_query_refund().return_once(|no| {
            Ok(refund_response_fixture(no, Some("50300807092026"), Some(refund_status::SUCCESS)))
        });
        let factory = MockGatewayFactory::new(gateway);
        let refunds = RefundFlowApi::new(refund_db, EventProducers::default());
        let merchants = MerchantApi::new(merchant_db);
        let outcome = run_refund_sweep(&refunds, &merchants, &factory).await.unwrap();
        assert_eq!(outcome.settled, 1);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn refunds_without_a_gateway_id_are_closed() {
        let refund_no = RefundNo("RWPB2026082300002".into());
        let mut refund_db = MockBridge::new();
        let refund = refund_fixture(&refund_no, 1, refund_status::PROCESSING);
        let returned = refund.clone();
        refund_db.expect_fetch_processing_refunds().return_once(move || Ok(vec![returned]));
        let recorded = refund.clone();
        refund_db.expect_record_refund_response().return_once(move |_, _| Ok(recorded));
        let mut closed = refund.clone();
        closed.status = refund_status::CLOSED.to_string();
        refund_db.expect_close_refund().return_once(move |_| Ok(closed));
        refund_db.expect_apply_refund_update().never();
        let mut merchant_db = MockBridge::new();
        merchant_db.expect_fetch_merchant_by_id().return_once(|_| Ok(Some(merchant_fixture(1))));
        let mut gateway = MockGateway::new();
        gateway.expect_query_refund().return_once(|no| Ok(refund_response_fixture(no, None, None)));
        let factory = MockGatewayFactory::new(gateway);
        let refunds = RefundFlowApi::new(refund_db, EventProducers::default());
        let merchants = MerchantApi::new(merchant_db);
        let outcome = run_refund_sweep(&refunds, &merchants, &factory).await.unwrap();
        assert_eq!(outcome.closed, 1);
    }

    #[tokio::test]
    async fn an_unknown_refund_at_the_gateway_is_closed() {
        let refund_no = RefundNo("RWPB2026082300003".into());
        let mut refund_db = MockBridge::new();
        let refund = refund_fixture(&refund_no, 1, refund_status::PROCESSING);
        let returned = refund.clone();
        refund_db.expect_fetch_processing_refunds().return_once(move || Ok(vec![returned]));
        let mut closed = refund.clone();
        closed.status = refund_status::CLOSED.to_string();
        refund_db.expect_close_refund().return_once(move |_| Ok(closed));
        refund_db.expect_record_refund_response().never();
        let mut merchant_db = MockBridge::new();
        merchant_db.expect_fetch_merchant_by_id().return_once(|_| Ok(Some(merchant_fixture(1))));
        let mut gateway = MockGateway::new();
        gateway.expect_query_refund().return_once(|_| {
            Err(WxPayApiError::QueryError { status: 404, message: "RESOURCE_NOT_EXISTS".to_string() })
        });
        let factory = MockGatewayFactory::new(gateway);
        let refunds = RefundFlowApi::new(refund_db, EventProducers::default());
        let merchants = MerchantApi::new(merchant_db);
        let outcome = run_refund_sweep(&refunds, &merchants, &factory).await.unwrap();
        assert_eq!(outcome.closed, 1);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn transient_gateway_errors_keep_the_refund_in_the_population() {
        let refund_no = RefundNo("RWPB2026082300004".into());
        let mut refund_db = MockBridge::new();
        let refund = refund_fixture(&refund_no, 1, refund_status::PROCESSING);
        let returned = refund.clone();
        refund_db.expect_fetch_processing_refunds().return_once(move || Ok(vec![returned]));
        refund_db.expect_close_refund().never();
        refund_db.expect_apply_refund_update().never();
        let mut merchant_db = MockBridge::new();
        merchant_db.expect_fetch_merchant_by_id().return_once(|_| Ok(Some(merchant_fixture(1))));
        let mut gateway = MockGateway::new();
        gateway.expect_query_refund().return_once(|_| {
            Err(WxPayApiError::QueryError { status: 503, message: "SYSTEM_ERROR".to_string() })
        });
        let factory = MockGatewayFactory::new(gateway);
        let refunds = RefundFlowApi::new(refund_db, EventProducers::default());
        let merchants = MerchantApi::new(merchant_db);
        let outcome = run_refund_sweep(&refunds, &merchants, &factory).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.closed, 0);
    }
}
