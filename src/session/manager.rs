use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::config::SessionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    Prime,
    Acceptable,
    Closed,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Prime => "prime",
            SessionType::Acceptable => "acceptable",
            SessionType::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub active: bool,
    pub session_type: SessionType,
    pub risk_multiplier: Decimal,
    pub reason: String,
}

/// Classifies the current time into a configured trading window and yields
/// the session risk multiplier.
pub struct SessionManager {
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    pub fn current_session(&self, now: DateTime<Utc>) -> SessionInfo {
        let time = now.time();

        for window in &self.settings.prime {
            if window.enabled && self.in_window(time, &window.start, &window.end) {
                return SessionInfo {
                    active: true,
                    session_type: SessionType::Prime,
                    risk_multiplier: self.settings.risk_multiplier.prime,
                    reason: format!("prime session {}-{}", window.start, window.end),
                };
            }
        }

        for window in &self.settings.acceptable {
            if window.enabled && self.in_window(time, &window.start, &window.end) {
                return SessionInfo {
                    active: true,
                    session_type: SessionType::Acceptable,
                    risk_multiplier: self.settings.risk_multiplier.acceptable,
                    reason: format!("acceptable session {}-{}", window.start, window.end),
                };
            }
        }

        SessionInfo {
            active: false,
            session_type: SessionType::Closed,
            risk_multiplier: Decimal::ZERO,
            reason: "no active trading window".to_string(),
        }
    }

    /// Half-open window [start, end); a start after the end spans midnight.
    fn in_window(&self, time: NaiveTime, start: &str, end: &str) -> bool {
        let (start, end) = match (
            NaiveTime::parse_from_str(start, "%H:%M"),
            NaiveTime::parse_from_str(end, "%H:%M"),
        ) {
            (Ok(s), Ok(e)) => (s, e),
            _ => {
                warn!("invalid session window {}-{}", start, end);
                return false;
            }
        };

        if start <= end {
            start <= time && time < end
        } else {
            time >= start || time < end
        }
    }
}
