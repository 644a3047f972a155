use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFreshness {
    pub cached: bool,
    /// `None` when there are no rows.
    pub cache_age_minutes: Option<i64>,
}

/// `cached` iff `now - latest < ttl`. A `latest` in the future counts as age 0.
pub fn assess_freshness(
    latest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> CacheFreshness {
    match latest {
        None => CacheFreshness {
            cached: false,
            cache_age_minutes: None,
        },
        Some(ts) => {
            let age = (now - ts).max(Duration::zero());
            CacheFreshness {
                cached: age < ttl,
                cache_age_minutes: Some(age.num_minutes()),
            }
        }
    }
}
