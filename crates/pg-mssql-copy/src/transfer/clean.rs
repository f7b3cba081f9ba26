//! Pre-load value cleaning.
//!
//! SQL Server rejects datetimes outside its supported range and FLOAT cannot
//! hold NaN/Infinity, so offending values become NULL before bulk insert.

use crate::target::{SqlNullType, SqlValue};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Inclusive year bounds the destination accepts in datetime columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub min_year: i32,
    pub max_year: i32,
}

impl Default for TimestampRange {
    fn default() -> Self {
        // DATETIME lower bound and DATETIME2 upper bound
        Self {
            min_year: 1753,
            max_year: 9999,
        }
    }
}

impl TimestampRange {
    fn contains_datetime(&self, dt: &chrono::NaiveDateTime) -> bool {
        let year = dt.date().year();
        year >= self.min_year && year <= self.max_year
    }

    fn contains_date(&self, d: &chrono::NaiveDate) -> bool {
        let year = d.year();
        year >= self.min_year && year <= self.max_year
    }
}

/// Replace destination-incompatible values in a batch with NULL.
///
/// Out-of-range timestamps and dates become NULL rather than failing the
/// batch; so do non-finite floats. Counts are logged per batch.
pub fn clean_batch(rows: &mut [Vec<SqlValue>], range: &TimestampRange) {
    let mut clamped_temporal = 0usize;
    let mut clamped_float = 0usize;

    for row in rows.iter_mut() {
        for value in row.iter_mut() {
            match value {
                SqlValue::DateTime(dt) if !range.contains_datetime(dt) => {
                    *value = SqlValue::Null(SqlNullType::DateTime);
                    clamped_temporal += 1;
                }
                SqlValue::Date(d) if !range.contains_date(d) => {
                    *value = SqlValue::Null(SqlNullType::Date);
                    clamped_temporal += 1;
                }
                SqlValue::F64(f) if !f.is_finite() => {
                    *value = SqlValue::Null(SqlNullType::F64);
                    clamped_float += 1;
                }
                _ => {}
            }
        }
    }

    if clamped_temporal > 0 {
        warn!(
            "Clamped {} out-of-range timestamps to NULL (allowed years {}..={})",
            clamped_temporal, range.min_year, range.max_year
        );
    }
    if clamped_float > 0 {
        warn!("Clamped {} non-finite floats to NULL", clamped_float);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(year: i32, month: u32, day: u32) -> SqlValue {
        SqlValue::DateTime(
            chrono::NaiveDate::from_ymd_opt(year, month, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_year_one_becomes_null() {
        let mut rows = vec![vec![dt(1, 1, 1)]];
        clean_batch(&mut rows, &TimestampRange::default());
        assert_eq!(rows[0][0], SqlValue::Null(SqlNullType::DateTime));
    }

    #[test]
    fn test_range_boundaries() {
        let range = TimestampRange::default();

        let mut rows = vec![vec![
            dt(1752, 12, 31),
            dt(1753, 1, 1),
            dt(9999, 12, 31),
            dt(10_000, 1, 1),
        ]];
        clean_batch(&mut rows, &range);

        assert_eq!(rows[0][0], SqlValue::Null(SqlNullType::DateTime));
        assert!(matches!(rows[0][1], SqlValue::DateTime(_)));
        assert!(matches!(rows[0][2], SqlValue::DateTime(_)));
        assert_eq!(rows[0][3], SqlValue::Null(SqlNullType::DateTime));
    }

    #[test]
    fn test_date_out_of_range_becomes_null() {
        let early = SqlValue::Date(chrono::NaiveDate::from_ymd_opt(1700, 6, 1).unwrap());
        let ok = SqlValue::Date(chrono::NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
        let mut rows = vec![vec![early, ok]];
        clean_batch(&mut rows, &TimestampRange::default());
        assert_eq!(rows[0][0], SqlValue::Null(SqlNullType::Date));
        assert!(matches!(rows[0][1], SqlValue::Date(_)));
    }

    #[test]
    fn test_custom_range() {
        let range = TimestampRange {
            min_year: 1900,
            max_year: 2100,
        };
        let mut rows = vec![vec![dt(1899, 12, 31), dt(1900, 1, 1)]];
        clean_batch(&mut rows, &range);
        assert_eq!(rows[0][0], SqlValue::Null(SqlNullType::DateTime));
        assert!(matches!(rows[0][1], SqlValue::DateTime(_)));
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        let mut rows = vec![vec![
            SqlValue::F64(f64::NAN),
            SqlValue::F64(f64::INFINITY),
            SqlValue::F64(f64::NEG_INFINITY),
            SqlValue::F64(2.25),
        ]];
        clean_batch(&mut rows, &TimestampRange::default());
        assert_eq!(rows[0][0], SqlValue::Null(SqlNullType::F64));
        assert_eq!(rows[0][1], SqlValue::Null(SqlNullType::F64));
        assert_eq!(rows[0][2], SqlValue::Null(SqlNullType::F64));
        assert_eq!(rows[0][3], SqlValue::F64(2.25));
    }

    #[test]
    fn test_other_values_untouched() {
        let mut rows = vec![vec![
            SqlValue::I32(7),
            SqlValue::String("keep".into()),
            SqlValue::Bool(true),
            SqlValue::Null(SqlNullType::String),
        ]];
        let before = rows.clone();
        clean_batch(&mut rows, &TimestampRange::default());
        assert_eq!(rows, before);
    }
}
