//! 通用工具函数

use chrono::{DateTime, Utc};

/// 生成人类可读的预约流水号，例如 `AMB-20240105-000042`
pub fn format_reference(prefix: &str, created_at: DateTime<Utc>, sequence: u64) -> String {
    format!("{}-{}-{:06}", prefix, created_at.format("%Y%m%d"), sequence)
}

/// 验证流水号格式
pub fn is_valid_reference(reference: &str) -> bool {
    let parts: Vec<&str> = reference.split('-').collect();
    parts.len() == 3
        && !parts[0].is_empty()
        && parts[0].chars().all(|c| c.is_ascii_uppercase())
        && parts[1].len() == 8
        && parts[1].chars().all(|c| c.is_ascii_digit())
        && parts[2].len() >= 6
        && parts[2].chars().all(|c| c.is_ascii_digit())
}

/// 按货币最小单位精度四舍五入
pub fn round_currency(amount: f64, minor_unit_digits: u32) -> f64 {
    let factor = 10f64.powi(minor_unit_digits as i32);
    (amount * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_reference() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap();
        let reference = format_reference("AMB", at, 42);
        assert_eq!(reference, "AMB-20240105-000042");
        assert!(is_valid_reference(&reference));
    }

    #[test]
    fn test_is_valid_reference() {
        assert!(!is_valid_reference(""));
        assert!(!is_valid_reference("AMB-2024-000001"));
        assert!(!is_valid_reference("amb-20240105-000001"));
    }

    #[test]
    fn test_round_currency() {
        assert_eq!(round_currency(10.006, 2), 10.01);
        assert_eq!(round_currency(1234.5678, 2), 1234.57);
        assert_eq!(round_currency(99.5, 0), 100.0);
    }
}
