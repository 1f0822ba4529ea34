use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    LiquiditySweep,
    StructureBreak,
    PullbackContinuation,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::LiquiditySweep => "liquidity_sweep",
            EntryType::StructureBreak => "structure_break",
            EntryType::PullbackContinuation => "pullback_continuation",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentKind {
    BothBullish,
    BothBearish,
    M5BullishM1Neutral,
    M5NeutralM1Bullish,
    M5BearishM1Neutral,
    M5NeutralM1Bearish,
    BothNeutral,
    Conflicting,
}

impl AlignmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentKind::BothBullish => "both_bullish",
            AlignmentKind::BothBearish => "both_bearish",
            AlignmentKind::M5BullishM1Neutral => "m5_bullish_m1_neutral",
            AlignmentKind::M5NeutralM1Bullish => "m5_neutral_m1_bullish",
            AlignmentKind::M5BearishM1Neutral => "m5_bearish_m1_neutral",
            AlignmentKind::M5NeutralM1Bearish => "m5_neutral_m1_bearish",
            AlignmentKind::BothNeutral => "both_neutral",
            AlignmentKind::Conflicting => "conflicting",
        }
    }
}

/// Outcome of the M5-trend x M1-momentum alignment check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub kind: AlignmentKind,
    pub score: Decimal,
    /// M5 trend was neutral; the loop tightens the stop and scales the
    /// position down for these entries.
    pub neutral_trend: bool,
}

/// A scored trade decision. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub direction: Side,
    pub entry_type: EntryType,
    /// 0..=100.
    pub confidence: Decimal,
    pub time: DateTime<Utc>,
    pub reason: String,
    pub price: Decimal,
    pub alignment: AlignmentResult,
}
