//! Schedule parsing: cron expressions and the `@every` shorthand.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SyncError;

/// When a task fires: on a cron expression or at a fixed interval.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl Schedule {
    /// The next fire instant strictly after `after`, or `None` when the
    /// expression has no future occurrence.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(schedule) => schedule.after(&after).next(),
            Schedule::Every(interval) => {
                let interval = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(interval)
            }
        }
    }
}

impl FromStr for Schedule {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(interval) = s.strip_prefix("@every ") {
            let interval = humantime::parse_duration(interval.trim()).map_err(|e| {
                SyncError::Schedule(format!("invalid @every interval '{s}': {e}"))
            })?;
            if interval.is_zero() {
                return Err(SyncError::Schedule(format!(
                    "@every interval must be positive in '{s}'"
                )));
            }
            return Ok(Schedule::Every(interval));
        }

        // The cron parser wants a seconds field; plain five-field
        // expressions get a zero second prepended.
        let expression = if s.split_whitespace().count() == 5 {
            format!("0 {s}")
        } else {
            s.to_string()
        };
        let schedule = cron::Schedule::from_str(&expression)
            .map_err(|e| SyncError::Schedule(format!("invalid cron expression '{s}': {e}")))?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }
}
