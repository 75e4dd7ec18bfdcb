use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped price observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }

    /// Stamps `price` with the current UTC time.
    pub fn now(price: f64) -> Self {
        Self::new(Utc::now(), price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_json_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_string(&Sample::new(ts, 64250.5)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["price"], serde_json::json!(64250.5));
        assert_eq!(value["timestamp"], serde_json::json!("2024-05-01T12:00:00Z"));
    }
}
