use log::*;
use wpb_common::parse_u64_flag;

pub const DEFAULT_WXPAY_BASE_URL: &str = "https://api.mch.weixin.qq.com";
pub const DEFAULT_WXPAY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct WxPayConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for WxPayConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_WXPAY_BASE_URL.to_string(), timeout_secs: DEFAULT_WXPAY_TIMEOUT_SECS }
    }
}

impl WxPayConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("WPB_WXPAY_BASE_URL").unwrap_or_else(|_| {
            warn!("WPB_WXPAY_BASE_URL not set, using the production gateway host");
            DEFAULT_WXPAY_BASE_URL.to_string()
        });
        let timeout_secs = parse_u64_flag(std::env::var("WPB_WXPAY_TIMEOUT_SECS").ok(), DEFAULT_WXPAY_TIMEOUT_SECS);
        Self { base_url, timeout_secs }
    }
}
