use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use log::*;
use payment_bridge_engine::{
    db_types::{BillCategory, Merchant, NewBillRecord},
    traits::{BillManagement, MerchantManagement, ObjectStore},
    BillApi,
    MerchantApi,
    PaymentFlowError,
    SqliteDatabase,
};
use wxpay_tools::WxPayGateway;

use crate::integrations::WxPayGatewayFactory;

/// Starts the settlement bill download sweep. Do not await the returned JoinHandle, as it will
/// run indefinitely.
///
/// Every run re-covers the trailing `window_days` ending yesterday, because the gateway can make
/// a day's bills available late. The `(merchant, date, category)` uniqueness check makes the
/// re-cover free for everything already archived.
pub fn start_bill_download_worker<G, S>(
    db: SqliteDatabase,
    store: S,
    gateways: G,
    interval: Duration,
    window_days: u64,
) -> tokio::task::JoinHandle<()>
where
    G: WxPayGatewayFactory,
    S: ObjectStore + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        let bills = BillApi::new(db.clone());
        let merchants = MerchantApi::new(db);
        info!("🧾️ Bill download sweep started. Running every {} s over a {window_days}-day window", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🧾️ Running bill download sweep");
            match run_bill_sweep(&bills, &merchants, &store, &gateways, window_days).await {
                Ok(outcome) => info!("🧾️ Bill download sweep done. {outcome}"),
                Err(e) => error!("🧾️ The bill download sweep could not run. {e}"),
            }
        }
    })
}

/// What one pass of the bill download sweep did, counted per (merchant, date, category)
/// combination.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BillSweepOutcome {
    /// Combinations considered.
    pub considered: usize,
    /// Combinations skipped because a bill record already exists.
    pub skipped: usize,
    /// Bills fetched, stored and recorded on this pass.
    pub archived: usize,
    /// Combinations that failed. No partial record is left behind; they are retried next run.
    pub failed: usize,
}

impl std::fmt::Display for BillSweepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} combinations considered, {} already archived, {} newly archived, {} failed",
            self.considered, self.skipped, self.archived, self.failed
        )
    }
}

/// One pass over (valid merchant × trailing window date × bill category). Each combination either
/// completes as a whole — metadata fetched, content downloaded while the URL is still live, bytes
/// stored, record inserted — or leaves nothing behind for the next run to pick up.
pub async fn run_bill_sweep<B, G, S>(
    bills: &BillApi<B>,
    merchants: &MerchantApi<B>,
    store: &S,
    gateways: &G,
    window_days: u64,
) -> Result<BillSweepOutcome, PaymentFlowError>
where
    B: BillManagement + MerchantManagement,
    G: WxPayGatewayFactory,
    S: ObjectStore,
{
    let merchant_list = merchants.valid_merchants().await?;
    let yesterday = Utc::now().date_naive() - chrono::Duration::days(1);
    let mut outcome = BillSweepOutcome::default();
    for merchant in &merchant_list {
        let gateway = match gateways.gateway_for(merchant) {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!("🧾️ No gateway client for merchant {}. Skipping its bills this run. {e}", merchant.mch_id);
                continue;
            },
        };
        for days_back in 0..window_days {
            let bill_date = yesterday - chrono::Duration::days(days_back as i64);
            for category in BillCategory::ALL {
                outcome.considered += 1;
                let started = Instant::now();
                match archive_bill(bills, store, gateway.as_ref(), merchant, bill_date, category).await {
                    Ok(true) => {
                        outcome.archived += 1;
                        debug!(
                            "🧾️ Archived {category} bill for merchant {} on {bill_date} in {} ms",
                            merchant.mch_id,
                            started.elapsed().as_millis()
                        );
                    },
                    Ok(false) => outcome.skipped += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        warn!(
                            "🧾️ Could not archive {category} bill for merchant {} on {bill_date} after {} ms. The \
                             sweep continues. {e}",
                            merchant.mch_id,
                            started.elapsed().as_millis()
                        );
                    },
                }
            }
        }
    }
    Ok(outcome)
}

/// Archives one bill. Returns `Ok(false)` when the triple is already on record, in which case no
/// network call is made at all.
async fn archive_bill<B, S, W>(
    bills: &BillApi<B>,
    store: &S,
    gateway: &W,
    merchant: &Merchant,
    bill_date: NaiveDate,
    category: BillCategory,
) -> Result<bool, PaymentFlowError>
where
    B: BillManagement,
    S: ObjectStore,
    W: WxPayGateway,
{
    if bills.bill_exists(merchant.id, bill_date, category).await? {
        return Ok(false);
    }
    let info = match category.gateway_code() {
        Some(code) => gateway.trade_bill(bill_date, code).await,
        None => gateway.fund_flow_bill(bill_date).await,
    }
    .map_err(|e| PaymentFlowError::Gateway(e.to_string()))?;
    // The download URL is only valid for a few minutes, so the fetch follows immediately.
    let content = gateway.download_bill(&info.download_url).await.map_err(|e| PaymentFlowError::Gateway(e.to_string()))?;
    let object_key = store.save(&content, "csv").await?;
    let record = NewBillRecord {
        merchant_id: merchant.id,
        bill_date,
        category,
        hash_type: Some(info.hash_type),
        hash_value: Some(info.hash_value),
        download_url: Some(info.download_url),
        object_key: Some(object_key),
    };
    bills.record_bill(record).await?;
    Ok(true)
}
