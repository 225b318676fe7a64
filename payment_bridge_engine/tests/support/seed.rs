use payment_bridge_engine::{
    db_types::{Fen, Merchant, NewMerchant, NewPaymentOrder, TradeType},
    MerchantManagement,
    SqliteDatabase,
};

/// The sample merchant from the gateway documentation.
pub async fn seed_merchant(db: &SqliteDatabase) -> Merchant {
    let merchant = NewMerchant::new("1900000109", "wx8888888888888888", "192006250b4c09247ec02edce69f6a2d");
    db.upsert_merchant(merchant).await.expect("Error seeding merchant")
}

pub fn sample_order(merchant_id: i64, amount: i64) -> NewPaymentOrder {
    NewPaymentOrder::new(
        merchant_id,
        TradeType::Native,
        Fen::from(amount),
        "image形象店-深圳腾大-QQ公仔",
        "https://bridge.example.com/notify/wechat",
    )
}
