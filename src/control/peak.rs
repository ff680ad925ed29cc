//! Peak-hour schedule.

use crate::config::{PeakConfig, PeakWindow};
use chrono::{Datelike, FixedOffset, NaiveDateTime, NaiveTime, Offset, Timelike, Utc, Weekday};

/// Decides whether a local wall-clock time falls inside a peak interval.
#[derive(Debug, Clone)]
pub struct PeakSchedule {
    offset: FixedOffset,
    weekday: Vec<PeakWindow>,
    weekend: Vec<PeakWindow>,
}

impl PeakSchedule {
    #[must_use]
    pub fn new(config: &PeakConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid peak-hour UTC offset {} minutes, using UTC",
                config.utc_offset_minutes
            );
            Utc.fix()
        });

        Self {
            offset,
            weekday: config.weekday.clone(),
            weekend: config.weekend.clone(),
        }
    }

    /// Current wall-clock time in the schedule's zone.
    #[must_use]
    pub fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }

    /// Whether it is peak hour right now.
    #[must_use]
    pub fn is_peak_hour(&self) -> bool {
        self.is_peak_at(self.now_local())
    }

    /// Whether `local` falls inside any interval of its day type.
    #[must_use]
    pub fn is_peak_at(&self, local: NaiveDateTime) -> bool {
        let windows = match local.weekday() {
            Weekday::Sat | Weekday::Sun => &self.weekend,
            _ => &self.weekday,
        };
        let minute = minutes_since_midnight(local.time());
        windows.iter().any(|w| {
            (minutes_since_midnight(w.start)..=minutes_since_midnight(w.end)).contains(&minute)
        })
    }
}

impl Default for PeakSchedule {
    fn default() -> Self {
        Self::new(&PeakConfig::default())
    }
}

fn minutes_since_midnight(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}
