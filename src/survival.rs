//! Time-to-death survival estimation from index events.
//!
//! A patient enters follow-up at each qualifying index event (a positive-test occurrence
//! from either the primary care record or SGSS), and is followed to death or to the end
//! of the cohort window, whichever is earlier. [`km_estimate`] then computes the standard
//! product-limit survival function over the resulting right-censored times, with tied
//! deaths handled as a single risk-set factor.

use crate::{config::NegativeTimePolicy, Extract, Result};
use chrono::NaiveDate;
use qu::ick_use::*;
use std::collections::BTreeMap;

/// Which death indicator to condition a curve on. Deaths of the other kind count as
/// censorings, not events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Any,
    Covid,
    NonCovid,
}

impl DeathCause {
    pub fn label(self) -> &'static str {
        match self {
            DeathCause::Any => "death",
            DeathCause::Covid => "death_covid",
            DeathCause::NonCovid => "death_noncovid",
        }
    }
}

/// Survival input derived from one index-event category: one record per (patient,
/// occurrence) pair with a recorded index date. Patients without a qualifying index event
/// contribute nothing.
#[derive(Debug, Clone, Default)]
pub struct SurvivalRecords {
    /// Days from index event to death or censoring.
    times: Vec<i64>,
    /// Indicator per cause; `indicators[cause]` is true where the record is an observed
    /// event for that cause.
    death: Vec<bool>,
    covid: Vec<bool>,
    noncovid: Vec<bool>,
    /// Records dropped or clipped under the negative time-to-event policy.
    pub negative_dropped: usize,
    pub negative_clipped: usize,
}

impl SurvivalRecords {
    /// Build survival input from every recorded occurrence of `index_category`.
    ///
    /// The event/censor date is the death date clipped to `end_of_follow_up`; each cause
    /// indicator is set only when the death happened within follow-up and the
    /// corresponding flag is set, otherwise the record is censored at end of follow-up
    /// for that cause.
    pub fn derive(
        extract: &Extract,
        index_category: &str,
        end_of_follow_up: NaiveDate,
        negative_time_policy: NegativeTimePolicy,
    ) -> Self {
        let mut records = SurvivalRecords::default();
        for row in extract.iter() {
            let died_in_window = matches!(row.death_date, Some(d) if d <= end_of_follow_up);
            let event_date = match row.death_date {
                Some(d) if d <= end_of_follow_up => d,
                _ => end_of_follow_up,
            };
            for index_date in row.dates_for(index_category) {
                let mut time = (event_date - index_date).num_days();
                if time < 0 {
                    match negative_time_policy {
                        NegativeTimePolicy::Keep => {}
                        NegativeTimePolicy::Exclude => {
                            records.negative_dropped += 1;
                            continue;
                        }
                        NegativeTimePolicy::ClipToZero => {
                            records.negative_clipped += 1;
                            time = 0;
                        }
                    }
                }
                records.times.push(time);
                records.death.push(died_in_window && row.died_any);
                records.covid.push(died_in_window && row.died_covid);
                records.noncovid.push(died_in_window && row.died_noncovid);
            }
        }
        records
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn indicators(&self, cause: DeathCause) -> &[bool] {
        match cause {
            DeathCause::Any => &self.death,
            DeathCause::Covid => &self.covid,
            DeathCause::NonCovid => &self.noncovid,
        }
    }

    pub fn events(&self, cause: DeathCause) -> usize {
        self.indicators(cause).iter().filter(|i| **i).count()
    }

    /// Kaplan-Meier curve for one cause.
    pub fn km(&self, cause: DeathCause) -> Result<KmCurve> {
        km_estimate(&self.times, self.indicators(cause))
    }
}

/// One row of a Kaplan-Meier curve: a distinct observed time and the state of the risk
/// set there.
#[derive(Debug, Clone, PartialEq)]
pub struct KmPoint {
    pub time: i64,
    /// Everyone whose event/censor time is at or after this time.
    pub at_risk: u32,
    pub died: u32,
    pub censored: u32,
    /// Cumulative survival estimate through this time.
    pub estimate: f64,
}

/// A Kaplan-Meier survival curve, one point per distinct observed time, ascending.
#[derive(Debug, Clone, Default)]
pub struct KmCurve {
    points: Vec<KmPoint>,
}

impl KmCurve {
    pub fn points(&self) -> &[KmPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &KmPoint> + '_ {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `1 - estimate` per time, the series plotted as cumulative incidence.
    pub fn cumulative_incidence(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.points.iter().map(|p| (p.time, 1.0 - p.estimate))
    }

    /// Restrict the curve to `time <= max_time` for display (e.g. a 0-90 day window).
    pub fn clamp_to(&self, max_time: i64) -> KmCurve {
        KmCurve {
            points: self
                .points
                .iter()
                .filter(|p| p.time <= max_time)
                .cloned()
                .collect(),
        }
    }
}

/// Compute the Kaplan-Meier survival function for right-censored times.
///
/// `times` and `indicators` are parallel: `indicators[i]` is true where record `i` is an
/// observed event, false where it is censored at that time. Empty input yields an empty
/// curve. The at-risk count at each distinct time includes the records whose event or
/// censoring is exactly at that time (the risk set is measured just before removal).
pub fn km_estimate(times: &[i64], indicators: &[bool]) -> Result<KmCurve> {
    ensure!(
        times.len() == indicators.len(),
        "times ({}) and indicators ({}) differ in length",
        times.len(),
        indicators.len()
    );
    if times.is_empty() {
        return Ok(KmCurve::default());
    }

    // events and censorings per distinct time, ascending. B Tree does the sort.
    let mut by_time: BTreeMap<i64, (u32, u32)> = BTreeMap::new();
    for (&time, &event) in times.iter().zip(indicators) {
        let entry = by_time.entry(time).or_insert((0, 0));
        if event {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    let n0 = times.len() as u32;
    let mut seen = 0u32;
    let mut estimate = 1.0f64;
    let mut points = Vec::with_capacity(by_time.len());
    for (time, (died, censored)) in by_time {
        // everyone not yet processed, including those leaving exactly now
        let at_risk = n0 - seen;
        seen += died + censored;
        if at_risk == 0 {
            // cannot happen while every record contributes a distinct-time entry, but
            // never divide by zero: the curve ends here.
            event!(Level::WARN, "empty risk set at time {}; truncating curve", time);
            break;
        }
        estimate *= f64::from(at_risk - died) / f64::from(at_risk);
        points.push(KmPoint {
            time,
            at_risk,
            died,
            censored,
            estimate,
        });
    }
    Ok(KmCurve { points })
}
