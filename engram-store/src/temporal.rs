//! Timestamp handling for episodes
//!
//! Covers expiry checks, the order-preserving byte encoding used by the
//! secondary indexes, and the cast applied to legacy timezone-naive values.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Width of an encoded timestamp key
pub const SORT_KEY_LEN: usize = 8;

/// Check if an episode with the given expiry is visible at `now`
///
/// Returns true if:
/// - No expired_at is set, OR
/// - expired_at is in the future
pub fn is_live(expired_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expired_at {
        None => true,
        Some(expired_at) => expired_at > now,
    }
}

/// Interpret a timezone-naive timestamp as UTC
pub fn assume_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// Encode microseconds since the epoch so that byte order matches numeric order
pub fn encode_micros(micros: i64) -> [u8; SORT_KEY_LEN] {
    ((micros as u64) ^ (1u64 << 63)).to_be_bytes()
}

/// Inverse of [`encode_micros`]
pub fn decode_micros(bytes: &[u8]) -> Option<i64> {
    let arr: [u8; SORT_KEY_LEN] = bytes.get(..SORT_KEY_LEN)?.try_into().ok()?;
    Some((u64::from_be_bytes(arr) ^ (1u64 << 63)) as i64)
}

/// Sort key for a timestamp, truncated to microseconds
pub fn sort_key(ts: &DateTime<Utc>) -> [u8; SORT_KEY_LEN] {
    encode_micros(ts.timestamp_micros())
}

/// Smallest key strictly greater than every key whose timestamp has the same
/// microsecond as `ts`
pub fn sort_key_after(ts: &DateTime<Utc>) -> [u8; SORT_KEY_LEN] {
    encode_micros(ts.timestamp_micros().saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_live() {
        let now = Utc::now();
        assert!(is_live(None, now));
        assert!(is_live(Some(now + Duration::hours(1)), now));
        assert!(!is_live(Some(now - Duration::hours(1)), now));
        // Expiry exactly at now is already expired
        assert!(!is_live(Some(now), now));
    }

    #[test]
    fn test_sort_key_order() {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let earlier = base - Duration::microseconds(1);
        let pre_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();

        assert!(sort_key(&earlier) < sort_key(&base));
        assert!(sort_key(&pre_epoch) < sort_key(&earlier));
        assert_eq!(sort_key_after(&earlier), sort_key(&base));
    }

    #[test]
    fn test_micros_roundtrip() {
        for micros in [i64::MIN, -1, 0, 1, 1_700_000_000_000_000, i64::MAX] {
            assert_eq!(decode_micros(&encode_micros(micros)), Some(micros));
        }
        assert_eq!(decode_micros(&[1, 2, 3]), None);
    }

    #[test]
    fn test_assume_utc() {
        let naive = chrono::NaiveDate::from_ymd_opt(2023, 6, 15)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let tz = assume_utc(naive);
        assert_eq!(tz.naive_utc(), naive);
    }
}
