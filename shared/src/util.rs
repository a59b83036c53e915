//! 时间工具

/// Format Unix millis as a compact UTC stamp (`%Y%m%d%H%M%S`).
///
/// Out-of-range values fall back to the Unix epoch.
pub fn compact_utc(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y%m%d%H%M%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_utc() {
        // 2024-01-01 00:00:00 UTC
        assert_eq!(compact_utc(1_704_067_200_000), "20240101000000");
        assert_eq!(compact_utc(1_704_070_861_000), "20240101010101");
    }
}
