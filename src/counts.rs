//! Turning per-patient occurrence dates into calendar-aligned count series.
//!
//! The pipeline here is: flatten each category's occurrence columns into a bag of dates
//! ([`normalize_category`]), bucket those into a dense daily series over the study window
//! ([`DailyCountSeries`]), then roll the days up into calendar weeks
//! ([`DailyCountSeries::resample_weekly`]). Each step is a pure function of its input.

use crate::{ArcStr, Extract, ExtractSchema, PatientId, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use qu::ick_use::*;
use std::collections::BTreeMap;

/// The observed event dates for one category, flattened across its occurrence columns.
#[derive(Debug, Clone)]
pub struct CategoryDates {
    pub category: ArcStr,
    /// One entry per (patient, occurrence) pair with a recorded date, nulls dropped.
    /// Repeated identical dates for a patient are distinct occurrences and all kept.
    pub dates: Vec<(PatientId, NaiveDate)>,
    /// Number of rows in the extract the dates were taken from, for population
    /// adjustment.
    pub population: usize,
}

/// Flatten one category's occurrence columns. A category with no recorded dates yields an
/// empty collection, not an error.
pub fn normalize_category(extract: &Extract, category: &str) -> CategoryDates {
    let dates = extract
        .iter()
        .flat_map(|row| {
            row.dates_for(category)
                .map(move |date| (row.patient_id, date))
        })
        .collect();
    CategoryDates {
        category: ArcStr::from(category),
        dates,
        population: extract.len(),
    }
}

/// Flatten every category in the schema, in schema order.
pub fn normalize_all(extract: &Extract, schema: &ExtractSchema) -> Vec<CategoryDates> {
    schema
        .categories
        .iter()
        .map(|cat| normalize_category(extract, cat.def.id))
        .collect()
}

/// Event counts for every day in a fixed window, zero-filled, in ascending date order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCountSeries {
    start: NaiveDate,
    counts: Vec<u32>,
    dropped: usize,
}

impl DailyCountSeries {
    /// Count `dates` into daily buckets over `[start, end]` inclusive.
    ///
    /// Dates outside the window are dropped, not clipped; they are events before cohort
    /// start or after the extraction date and are expected. The number dropped is kept on
    /// the series so callers can log it.
    pub fn from_dates(
        dates: impl IntoIterator<Item = NaiveDate>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self> {
        ensure!(
            start <= end,
            "daily count window starts ({}) after it ends ({})",
            start,
            end
        );
        let len = (end - start).num_days() as usize + 1;
        let mut counts = vec![0u32; len];
        let mut dropped = 0usize;
        for date in dates {
            if date < start || date > end {
                dropped += 1;
                continue;
            }
            counts[(date - start).num_days() as usize] += 1;
        }
        Ok(DailyCountSeries {
            start,
            counts,
            dropped,
        })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.start + Duration::days(self.counts.len() as i64 - 1)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// How many input dates fell outside the window.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn get(&self, date: NaiveDate) -> Option<u32> {
        if date < self.start || date > self.end() {
            return None;
        }
        Some(self.counts[(date - self.start).num_days() as usize])
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(move |(idx, count)| (self.start + Duration::days(idx as i64), *count))
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| u64::from(*c)).sum()
    }

    /// Rescale the counts to be per `per` of a population of `population` (e.g.
    /// `per = 1000.0` for counts per 1000 patients). Absolute counts are the default
    /// everywhere else; this is a presentation aid.
    pub fn population_adjusted(&self, population: usize, per: f64) -> Vec<(NaiveDate, f64)> {
        let scale = per / population as f64;
        self.iter()
            .map(|(date, count)| (date, f64::from(count) * scale))
            .collect()
    }

    /// Roll the daily series up into calendar weeks ending on `week_ends_on`, summing
    /// within each week. Head and tail weeks may be partial; they keep whatever days they
    /// actually cover.
    pub fn resample_weekly(&self, week_ends_on: Weekday) -> PeriodCountSeries {
        // B Tree so the periods come out in date order.
        let mut periods = BTreeMap::new();
        for (date, count) in self.iter() {
            let days_ahead = (week_ends_on.num_days_from_monday() + 7
                - date.weekday().num_days_from_monday())
                % 7;
            let week_end = date + Duration::days(i64::from(days_ahead));
            *periods.entry(week_end).or_insert(0u32) += count;
        }
        PeriodCountSeries {
            periods: periods.into_iter().collect(),
        }
    }
}

/// A daily series re-bucketed into coarser periods, labelled by period-end date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodCountSeries {
    periods: Vec<(NaiveDate, u32)>,
}

impl PeriodCountSeries {
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
        self.periods.iter().copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.periods.iter().map(|(date, _)| *date)
    }

    pub fn counts(&self) -> Vec<u32> {
        self.periods.iter().map(|(_, count)| *count).collect()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.periods.iter().map(|(_, c)| u64::from(*c)).sum()
    }
}

/// Weekly counts for every category, sharing one set of period labels. This is the shape
/// the published CSV and the report table are built from.
#[derive(Debug, Clone)]
pub struct WeeklyCountMatrix {
    pub period_ends: Vec<NaiveDate>,
    /// Category id and its per-period counts, in the same order as `period_ends`.
    pub columns: Vec<(ArcStr, Vec<u32>)>,
}

impl WeeklyCountMatrix {
    /// Assemble per-category weekly series into a matrix. All series must cover the same
    /// periods, which they do when produced from the same study window.
    pub fn from_series(series: Vec<(ArcStr, PeriodCountSeries)>) -> Result<Self> {
        let mut iter = series.iter();
        let period_ends: Vec<NaiveDate> = match iter.next() {
            Some((_, first)) => first.labels().collect(),
            None => Vec::new(),
        };
        for (category, s) in iter {
            ensure!(
                s.labels().eq(period_ends.iter().copied()),
                "category \"{}\" covers different periods to the rest of the matrix",
                category
            );
        }
        let columns = series
            .into_iter()
            .map(|(category, s)| (category, s.counts()))
            .collect();
        Ok(WeeklyCountMatrix {
            period_ends,
            columns,
        })
    }

    /// Total count per category over the whole window.
    pub fn totals(&self) -> Vec<(ArcStr, u64)> {
        self.columns
            .iter()
            .map(|(category, counts)| {
                (
                    category.clone(),
                    counts.iter().map(|c| u64::from(*c)).sum(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Datelike, NaiveDate, Weekday};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn daily_series_is_dense_and_complete() {
        let start = d(2020, 2, 1);
        let end = d(2020, 2, 29);
        let dates = vec![
            d(2020, 2, 1),
            d(2020, 2, 1),
            d(2020, 2, 14),
            d(2020, 2, 29),
            d(2020, 1, 31), // before window
            d(2020, 3, 1),  // after window
        ];
        let series = DailyCountSeries::from_dates(dates, start, end).unwrap();
        assert_eq!(series.len(), 29);
        assert_eq!(series.total(), 4);
        assert_eq!(series.dropped(), 2);
        assert_eq!(series.get(d(2020, 2, 1)), Some(2));
        assert_eq!(series.get(d(2020, 2, 2)), Some(0));
        assert_eq!(series.get(d(2020, 3, 1)), None);
        // ascending, no gaps
        let dates: Vec<_> = series.iter().map(|(date, _)| date).collect();
        assert_eq!(dates[0], start);
        assert_eq!(*dates.last().unwrap(), end);
        assert!(dates.windows(2).all(|w| w[1] == w[0].succ_opt().unwrap()));
    }

    #[test]
    fn empty_input_gives_zero_filled_series() {
        let series =
            DailyCountSeries::from_dates(std::iter::empty(), d(2020, 3, 1), d(2020, 3, 10))
                .unwrap();
        assert_eq!(series.len(), 10);
        assert_eq!(series.total(), 0);
        assert!(series.iter().all(|(_, count)| count == 0));
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(
            DailyCountSeries::from_dates(std::iter::empty(), d(2020, 3, 10), d(2020, 3, 1))
                .is_err()
        );
    }

    #[test]
    fn population_adjustment_scales_counts() {
        let series = DailyCountSeries::from_dates(
            vec![d(2020, 2, 1), d(2020, 2, 1), d(2020, 2, 2)],
            d(2020, 2, 1),
            d(2020, 2, 3),
        )
        .unwrap();
        let adjusted = series.population_adjusted(2000, 1000.0);
        assert_eq!(adjusted[0].1, 1.0);
        assert_eq!(adjusted[1].1, 0.5);
        assert_eq!(adjusted[2].1, 0.0);
    }

    #[test]
    fn weekly_resample_preserves_totals() {
        // 2020-02-01 is a Saturday; window deliberately not week-aligned.
        let dates: Vec<NaiveDate> = (0..57)
            .filter(|i| i % 3 == 0)
            .map(|i| d(2020, 2, 1) + chrono::Duration::days(i))
            .collect();
        let series = DailyCountSeries::from_dates(dates, d(2020, 2, 1), d(2020, 3, 28)).unwrap();
        let weekly = series.resample_weekly(Weekday::Sun);
        assert_eq!(weekly.total(), series.total());
        assert!(weekly.labels().all(|label| label.weekday() == Weekday::Sun));
        // labels ascending with no duplicates
        let labels: Vec<_> = weekly.labels().collect();
        assert!(labels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn partial_periods_are_kept() {
        // Sat 2020-02-01 .. Tue 2020-02-11: partial head week (Sat-Sun) and partial tail
        // week (Mon-Tue).
        let dates = vec![d(2020, 2, 1), d(2020, 2, 2), d(2020, 2, 10), d(2020, 2, 11)];
        let series = DailyCountSeries::from_dates(dates, d(2020, 2, 1), d(2020, 2, 11)).unwrap();
        let weekly = series.resample_weekly(Weekday::Sun);
        let periods: Vec<_> = weekly.iter().collect();
        assert_eq!(
            periods,
            vec![
                (d(2020, 2, 2), 2),  // Sat + Sun
                (d(2020, 2, 9), 0),  // full week, no events
                (d(2020, 2, 16), 2), // Mon + Tue of the unfinished week
            ]
        );
    }

    #[test]
    fn matrix_requires_matching_periods() {
        let a = DailyCountSeries::from_dates(std::iter::empty(), d(2020, 2, 1), d(2020, 2, 14))
            .unwrap()
            .resample_weekly(Weekday::Sun);
        let b = DailyCountSeries::from_dates(std::iter::empty(), d(2020, 2, 1), d(2020, 2, 21))
            .unwrap()
            .resample_weekly(Weekday::Sun);
        let err = WeeklyCountMatrix::from_series(vec![
            (crate::ArcStr::from("one"), a.clone()),
            (crate::ArcStr::from("two"), b),
        ]);
        assert!(err.is_err());
        let ok = WeeklyCountMatrix::from_series(vec![
            (crate::ArcStr::from("one"), a.clone()),
            (crate::ArcStr::from("two"), a),
        ]);
        assert!(ok.is_ok());
    }
}
