// Utility functions shared across the cache, dispatcher and API layers

pub mod time {
    use chrono::{TimeZone, Utc};

    /// Current wall-clock time in milliseconds since the Unix epoch
    #[inline]
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Human-readable UTC rendering: `YYYYMMDD HH:MM:SS.mmm`
    pub fn format_millis(ms: i64) -> Option<String> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .map(|dt| dt.format("%Y%m%d %H:%M:%S%.3f").to_string())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_format_millis() {
            assert_eq!(
                format_millis(1_700_000_000_123).as_deref(),
                Some("20231114 22:13:20.123")
            );
        }
    }
}

pub mod validation {
    /// Validate that a symbol is usable as a cache key and channel name
    pub fn is_valid_symbol(symbol: &str) -> bool {
        !symbol.is_empty()
            && symbol.len() <= 32
            && symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_symbol_validation() {
            assert!(is_valid_symbol("BTCUSDT"));
            assert!(is_valid_symbol("BTC_PERP"));
            assert!(!is_valid_symbol(""));
            assert!(!is_valid_symbol("../etc"));
        }
    }
}
