use core_types::{MonthlyTotal, YearMonth};
use serde::{Deserialize, Serialize};

/// The reference window a commodity's progress is measured against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineWindow {
    pub value: f64,
    /// Human-readable label: `"2022-03_to_2023-02"` or `"2022"`.
    pub label: String,
    pub start: YearMonth,
    pub end: YearMonth,
}

fn is_contiguous(window: &[MonthlyTotal]) -> bool {
    let Some(first) = window.first() else {
        return true;
    };
    let start_key = first.month_key();
    window
        .iter()
        .enumerate()
        .all(|(idx, entry)| entry.month_key() == start_key + idx as i64)
}

/// Picks the baseline window for one commodity.
///
/// `series` must be the full monthly time series, sorted chronologically,
/// one entry per observed month. Selection order is normative:
///
/// 1. the earliest run of 12 consecutive months that all carry a non-null
///    total, summed and labeled `"YYYY-MM_to_YYYY-MM"`;
/// 2. otherwise the most recent calendar year with all 12 months present in
///    the data: non-null totals summed, labeled `"YYYY"`;
/// 3. otherwise `None`; the commodity reports only current-state metrics.
pub fn select_baseline(series: &[MonthlyTotal]) -> Option<BaselineWindow> {
    if series.len() < 12 {
        return None;
    }

    for window in series.windows(12) {
        if !is_contiguous(window) || !window.iter().all(|entry| entry.total.is_some()) {
            continue;
        }
        let (first, last) = (&window[0], &window[11]);
        let start = YearMonth { year: first.year, month: first.month };
        let end = YearMonth { year: last.year, month: last.month };
        return Some(BaselineWindow {
            value: window.iter().filter_map(|entry| entry.total).sum(),
            label: format!("{}_to_{}", start, end),
            start,
            end,
        });
    }

    // Fallback: the most recent calendar year for which every month appears.
    let mut years: Vec<i32> = series.iter().map(|entry| entry.year).collect();
    years.dedup();
    for year in years.into_iter().rev() {
        let months: Vec<&MonthlyTotal> =
            series.iter().filter(|entry| entry.year == year).collect();
        if months.len() != 12 {
            continue;
        }
        return Some(BaselineWindow {
            value: months.iter().filter_map(|entry| entry.total).sum(),
            label: year.to_string(),
            start: YearMonth { year, month: 1 },
            end: YearMonth { year, month: 12 },
        });
    }

    None
}

/// The rolling 12-month current total: the last 12 observed months, which
/// must be contiguous. Null months inside the window count as zero.
///
/// Returns the total with the window bounds, or `None` when fewer than 12
/// months exist or the tail of the series has a gap.
pub fn rolling_current(series: &[MonthlyTotal]) -> Option<(f64, YearMonth, YearMonth)> {
    if series.len() < 12 {
        return None;
    }
    let window = &series[series.len() - 12..];
    if !is_contiguous(window) {
        return None;
    }
    let total = window.iter().map(|entry| entry.total.unwrap_or(0.0)).sum();
    let (first, last) = (&window[0], &window[11]);
    Some((
        total,
        YearMonth { year: first.year, month: first.month },
        YearMonth { year: last.year, month: last.month },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn months(from: (i32, u32), count: usize, value: f64) -> Vec<MonthlyTotal> {
        let mut out = Vec::with_capacity(count);
        let (mut year, mut month) = from;
        for _ in 0..count {
            out.push(MonthlyTotal { year, month, total: Some(value) });
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
        out
    }

    #[test]
    fn fourteen_consecutive_months_select_the_first_twelve() {
        let series = months((2023, 1), 14, 100.0);
        let baseline = select_baseline(&series).unwrap();
        assert_eq!(baseline.label, "2023-01_to_2023-12");
        assert_eq!(baseline.value, 1_200.0);
        assert_eq!(baseline.start, YearMonth { year: 2023, month: 1 });
        assert_eq!(baseline.end, YearMonth { year: 2023, month: 12 });
    }

    #[test]
    fn null_gap_falls_back_to_complete_calendar_year() {
        // All of 2022 is present but June carries no value, so no 12-month
        // run of non-null totals exists; 2023 is scattered.
        let mut series = months((2022, 1), 12, 50.0);
        series[5].total = None;
        for month in [1, 3, 5] {
            series.push(MonthlyTotal { year: 2023, month, total: Some(80.0) });
        }
        let baseline = select_baseline(&series).unwrap();
        assert_eq!(baseline.label, "2022");
        assert_eq!(baseline.value, 550.0);
        assert_eq!(baseline.start, YearMonth { year: 2022, month: 1 });
        assert_eq!(baseline.end, YearMonth { year: 2022, month: 12 });
    }

    #[test]
    fn short_or_gapped_series_has_no_baseline() {
        let series = months((2024, 1), 11, 10.0);
        assert!(select_baseline(&series).is_none());

        // 12 entries spread over two partial years, with a gap.
        let mut gapped = months((2022, 1), 6, 10.0);
        gapped[2].total = None;
        gapped.extend(months((2023, 1), 6, 10.0));
        gapped[8].total = None;
        assert!(select_baseline(&gapped).is_none());
    }

    #[test]
    fn rolling_current_takes_the_contiguous_tail() {
        let series = months((2023, 1), 15, 10.0);
        let (total, start, end) = rolling_current(&series).unwrap();
        assert_eq!(total, 120.0);
        assert_eq!(start, YearMonth { year: 2023, month: 4 });
        assert_eq!(end, YearMonth { year: 2024, month: 3 });
    }

    #[test]
    fn rolling_current_rejects_a_gapped_tail() {
        let mut series = months((2023, 1), 6, 10.0);
        series.extend(months((2023, 8), 7, 10.0));
        assert!(rolling_current(&series).is_none());
    }
}
