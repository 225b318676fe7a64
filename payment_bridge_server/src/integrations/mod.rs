pub mod wechat;

pub use wechat::{ApiGatewayFactory, WxPayGatewayFactory};
