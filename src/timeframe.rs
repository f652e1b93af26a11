//! §3.1-3.2: sampling interval and intraday session window.

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Minute => "Min",
            TimeUnit::Hour => "H",
            TimeUnit::Day => "D",
            TimeUnit::Week => "W",
        };
        write!(f, "{s}")
    }
}

/// §3.1 Timeframe: an intern-able sampling interval identifier (`1Min`,
/// `1H`, `1D`, `1W`). Equality/hash are on the normalized canonical string,
/// not on the struct fields, matching the source system's string-keyed
/// timeframe maps.
#[derive(Copy, Clone, Debug)]
pub struct Timeframe {
    unit: TimeUnit,
    multiplier: u32,
    /// Anchor day-of-week for weekly timeframes (0 = Monday), unused otherwise.
    anchor_weekday: Option<u8>,
}

impl Timeframe {
    pub fn new(unit: TimeUnit, multiplier: u32) -> Self {
        Self {
            unit,
            multiplier: multiplier.max(1),
            anchor_weekday: None,
        }
    }

    pub fn weekly_anchored(multiplier: u32, anchor_weekday: u8) -> Self {
        Self {
            unit: TimeUnit::Week,
            multiplier: multiplier.max(1),
            anchor_weekday: Some(anchor_weekday % 7),
        }
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn is_intraday(&self) -> bool {
        matches!(self.unit, TimeUnit::Minute | TimeUnit::Hour)
    }

    /// The canonical string form, e.g. `"1Min"`, `"5Min"`, `"1H"`, `"1D"`, `"1W"`.
    pub fn canonical(&self) -> String {
        format!("{}{}", self.multiplier, self.unit)
    }

    /// Parses the canonical string form produced by `canonical()`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        for (suffix, unit) in [
            ("Min", TimeUnit::Minute),
            ("H", TimeUnit::Hour),
            ("D", TimeUnit::Day),
            ("W", TimeUnit::Week),
        ] {
            if let Some(mult_str) = s.strip_suffix(suffix) {
                if let Ok(mult) = mult_str.parse::<u32>() {
                    return Some(Timeframe::new(unit, mult));
                }
            }
        }
        None
    }

    /// The resample offset string polars/pandas-style resampling expects
    /// (e.g. `"5m"`, `"1h"`, `"1d"`, `"1w"`).
    pub fn resample_offset(&self) -> String {
        let unit = match self.unit {
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "w",
        };
        format!("{}{}", self.multiplier, unit)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl PartialEq for Timeframe {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}
impl Eq for Timeframe {}

impl std::hash::Hash for Timeframe {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

/// §3.2 Session Range: an `(open, close)` pair in a known timezone, used to
/// slice intraday frames to a trading session.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionRange {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub tz: Tz,
}

impl SessionRange {
    pub fn new(open: NaiveTime, close: NaiveTime, tz: Tz) -> Self {
        Self { open, close, tz }
    }

    /// Whether a given UTC-naive time-of-day (already converted to this
    /// session's timezone by the caller) falls inside `[open, close)`.
    pub fn contains_time(&self, time: NaiveTime) -> bool {
        if self.open <= self.close {
            time >= self.open && time < self.close
        } else {
            // overnight session, e.g. 22:00 -> 06:00
            time >= self.open || time < self.close
        }
    }
}
