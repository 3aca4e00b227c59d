use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use uuid::Uuid;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Opaque random value identifying a single lock holder.
pub fn random_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Uniformly random delay in `[min, max]`.
pub fn jittered(min: Duration, max: Duration) -> Duration {
    let low = min.as_millis() as u64;
    let high = (max.as_millis() as u64).max(low);
    Duration::from_millis(rand::rng().random_range(low..=high))
}

pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
