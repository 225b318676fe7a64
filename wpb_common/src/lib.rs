mod fen;
mod helpers;

pub mod op;
mod secret;

pub use fen::{Fen, FenConversionError, CNY_CURRENCY_CODE, CNY_CURRENCY_CODE_LOWER};
pub use helpers::{parse_boolean_flag, parse_u64_flag};
pub use secret::Secret;
