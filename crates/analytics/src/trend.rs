//! Weekly aggregation of stored waste predictions.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shelflife_core::Money;

use crate::waste::WastePrediction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyWastePoint {
    /// Monday of the ISO week.
    pub week_start: NaiveDate,
    pub total_value: Money,
    pub total_quantity: u64,
    pub prediction_count: usize,
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Buckets predictions by the week of `created_at`.
///
/// Returns exactly `weeks` points, oldest first, ending with the week containing `now`.
/// Weeks without predictions are zero-filled; predictions outside the window are ignored.
pub fn weekly_trend(
    predictions: &[WastePrediction],
    weeks: u32,
    now: DateTime<Utc>,
) -> Vec<WeeklyWastePoint> {
    if weeks == 0 {
        return Vec::new();
    }

    let current = week_start(now.date_naive());
    let mut points: Vec<WeeklyWastePoint> = (0..weeks as i64)
        .rev()
        .map(|back| WeeklyWastePoint {
            week_start: current - Duration::weeks(back),
            total_value: Decimal::ZERO,
            total_quantity: 0,
            prediction_count: 0,
        })
        .collect();

    let first = points[0].week_start;
    for p in predictions {
        let start = week_start(p.created_at.date_naive());
        if start < first || start > current {
            continue;
        }
        let idx = ((start - first).num_days() / 7) as usize;
        let point = &mut points[idx];
        point.total_value += p.predicted_value;
        point.total_quantity += p.predicted_quantity as u64;
        point.prediction_count += 1;
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waste::WasteCause;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use shelflife_core::{PredictionId, ProductId, StoreId};

    fn prediction(at: DateTime<Utc>, quantity: u32, value: Decimal) -> WastePrediction {
        WastePrediction {
            id: PredictionId::new(),
            store_id: StoreId::new(),
            product_id: ProductId::new(),
            product_name: "Milk".to_string(),
            predicted_quantity: quantity,
            predicted_value: value,
            cause: WasteCause::Expiration,
            confidence: 0.75,
            recommendation: String::new(),
            horizon_date: at + Duration::days(7),
            created_at: at,
        }
    }

    #[test]
    fn week_start_is_monday() {
        // 2024-06-05 is a Wednesday.
        let wed = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        assert_eq!(week_start(wed), NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        let mon = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(week_start(mon), mon);
    }

    #[test]
    fn buckets_are_zero_filled_and_oldest_first() {
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap();
        let preds = vec![
            prediction(now, 3, dec!(4.50)),
            prediction(now - Duration::days(1), 2, dec!(1.00)),
            prediction(now - Duration::weeks(2), 10, dec!(10.00)),
            prediction(now - Duration::weeks(9), 99, dec!(99.00)),
        ];

        let trend = weekly_trend(&preds, 4, now);

        assert_eq!(trend.len(), 4);
        assert_eq!(trend[0].week_start, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(trend[0].prediction_count, 0);
        assert_eq!(trend[1].total_value, dec!(10.00));
        assert_eq!(trend[2].prediction_count, 0);
        assert_eq!(trend[3].total_value, dec!(5.50));
        assert_eq!(trend[3].total_quantity, 5);
        assert_eq!(trend[3].prediction_count, 2);
    }

    #[test]
    fn zero_weeks_is_empty() {
        assert!(weekly_trend(&[], 0, Utc::now()).is_empty());
    }
}
