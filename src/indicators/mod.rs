pub mod atr;
pub mod ema;
pub mod rsi;
pub mod swing;

pub use atr::*;
pub use ema::*;
pub use rsi::*;
pub use swing::*;

use rust_decimal::Decimal;

pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().sum();
    Some(sum / Decimal::from(values.len() as u32))
}
