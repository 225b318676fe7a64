use std::{env, time::Duration};

use log::*;
use wpb_common::{parse_boolean_flag, parse_u64_flag};
use wxpay_tools::WxPayConfig;

const DEFAULT_WPB_HOST: &str = "127.0.0.1";
const DEFAULT_WPB_PORT: u16 = 8480;
const DEFAULT_NOTIFY_BASE_URL: &str = "http://localhost:8480";
const DEFAULT_BILL_STORAGE_DIR: &str = "./data/bills";
const DEFAULT_ORDER_SWEEP_SECS: u64 = 30;
const DEFAULT_REFUND_SWEEP_SECS: u64 = 60;
const DEFAULT_BILL_SWEEP_SECS: u64 = 43_200;
const DEFAULT_BILL_WINDOW_DAYS: u64 = 7;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The public base URL the gateway can reach this server on, e.g. `https://pay.example.com`.
    /// Notify URLs for new orders and refunds are derived from it, so it must not end in a slash.
    pub notify_base_url: String,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    /// Directory that downloaded settlement bill files are stored under.
    pub bill_storage_dir: String,
    /// How often the expired-order sweep runs. This sweep is the correctness backstop for lost
    /// payment callbacks, so it runs on a short cadence.
    pub order_sweep_interval: Duration,
    /// How often refunds still in PROCESSING are polled against the gateway.
    pub refund_sweep_interval: Duration,
    /// How often the settlement bill download sweep runs.
    pub bill_sweep_interval: Duration,
    /// How many days back (ending yesterday) the bill sweep covers on each run.
    pub bill_window_days: u64,
    /// Connection parameters for the WeChat Pay API.
    pub wxpay: WxPayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_WPB_HOST.to_string(),
            port: DEFAULT_WPB_PORT,
            database_url: String::default(),
            notify_base_url: DEFAULT_NOTIFY_BASE_URL.to_string(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            bill_storage_dir: DEFAULT_BILL_STORAGE_DIR.to_string(),
            order_sweep_interval: Duration::from_secs(DEFAULT_ORDER_SWEEP_SECS),
            refund_sweep_interval: Duration::from_secs(DEFAULT_REFUND_SWEEP_SECS),
            bill_sweep_interval: Duration::from_secs(DEFAULT_BILL_SWEEP_SECS),
            bill_window_days: DEFAULT_BILL_WINDOW_DAYS,
            wxpay: WxPayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("WPB_HOST").ok().unwrap_or_else(|| DEFAULT_WPB_HOST.into());
        let port = env::var("WPB_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for WPB_PORT. {e} Using the default, {DEFAULT_WPB_PORT}, instead."
                    );
                    DEFAULT_WPB_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_WPB_PORT);
        let database_url = env::var("WPB_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ WPB_DATABASE_URL is not set. Please set it to the URL for the payment bridge database.");
            String::default()
        });
        let notify_base_url = env::var("WPB_NOTIFY_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .ok()
            .unwrap_or_else(|| {
                error!(
                    "🪛️ WPB_NOTIFY_BASE_URL is not set. The gateway will be told to deliver payment notifications \
                     to {DEFAULT_NOTIFY_BASE_URL}, which is almost certainly not what you want in production."
                );
                DEFAULT_NOTIFY_BASE_URL.into()
            });
        let use_x_forwarded_for = parse_boolean_flag(env::var("WPB_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("WPB_USE_FORWARDED").ok(), false);
        let bill_storage_dir = env::var("WPB_BILL_STORAGE_DIR").ok().unwrap_or_else(|| {
            info!("🪛️ WPB_BILL_STORAGE_DIR is not set. Storing settlement bills under {DEFAULT_BILL_STORAGE_DIR}.");
            DEFAULT_BILL_STORAGE_DIR.into()
        });
        let (order_sweep_interval, refund_sweep_interval, bill_sweep_interval) = configure_sweep_intervals();
        let bill_window_days = parse_u64_flag(env::var("WPB_BILL_WINDOW_DAYS").ok(), DEFAULT_BILL_WINDOW_DAYS);
        let wxpay = WxPayConfig::new_from_env_or_default();
        Self {
            host,
            port,
            database_url,
            notify_base_url,
            use_x_forwarded_for,
            use_forwarded,
            bill_storage_dir,
            order_sweep_interval,
            refund_sweep_interval,
            bill_sweep_interval,
            bill_window_days,
            wxpay,
        }
    }
}

fn configure_sweep_intervals() -> (Duration, Duration, Duration) {
    let order = sweep_interval_from("WPB_ORDER_SWEEP_INTERVAL", DEFAULT_ORDER_SWEEP_SECS);
    let refund = sweep_interval_from("WPB_REFUND_SWEEP_INTERVAL", DEFAULT_REFUND_SWEEP_SECS);
    let bill = sweep_interval_from("WPB_BILL_SWEEP_INTERVAL", DEFAULT_BILL_SWEEP_SECS);
    (order, refund, bill)
}

fn sweep_interval_from(var: &str, default_secs: u64) -> Duration {
    env::var(var)
        .map_err(|_| info!("🪛️ {var} is not set. Using the default value of {default_secs} s."))
        .and_then(|s| {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| warn!("🪛️ Invalid configuration value for {var}. {e}"))
        })
        .ok()
        .unwrap_or(Duration::from_secs(default_secs))
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// A subset of the server configuration that is used to configure the server's behaviour. Generally we try to keep this
/// as small as possible, and exclude secrets to avoid passing sensitive information around the system.
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self { use_x_forwarded_for: config.use_x_forwarded_for, use_forwarded: config.use_forwarded }
    }
}
