//! Study configuration.
//!
//! Everything that used to be ambient, module-level state (cohort date bounds, occurrence
//! caps, redaction threshold) lives in [`StudyConfig`], constructed once per run and passed
//! into each component.

use crate::util;
use chrono::{NaiveDate, Weekday};
use qu::ick_use::*;
use serde::Deserialize;
use std::{fs, path::Path};

/// How to treat a time-to-event that comes out negative (death date recorded before the
/// index event date).
///
/// These exist in the source data and are a data-quality problem, not a processing error,
/// so the handling is an explicit choice rather than something we infer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegativeTimePolicy {
    /// Pass negative times through unchanged.
    Keep,
    /// Drop the record from survival input.
    Exclude,
    /// Clip the time to zero.
    ClipToZero,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudyConfig {
    /// First day of the aggregation window (inclusive).
    pub start_date: NaiveDate,
    /// Last day of the aggregation window (inclusive). Also the end of follow-up for
    /// survival input.
    pub end_date: NaiveDate,
    /// Minimum gap between two recorded occurrences of the same category. The upstream
    /// extractor applies this when deciding whether two raw records are distinct
    /// occurrences; we carry it for documentation and validation only.
    #[serde(default = "default_min_days")]
    pub min_days_between_occurrences: u32,
    /// Occurrence-column cap for high-volume categories ("n" in the study definition).
    #[serde(default = "default_cap_n")]
    pub max_occurrences_frequent: usize,
    /// Occurrence-column cap for low-volume categories ("m" in the study definition).
    #[serde(default = "default_cap_m")]
    pub max_occurrences_infrequent: usize,
    /// Small-number disclosure threshold. Each redaction policy documents its own
    /// boundary against this value.
    #[serde(default = "default_threshold")]
    pub redaction_threshold: u32,
    /// Weekday each counting period ends on.
    #[serde(default = "default_week_end", deserialize_with = "util::weekday")]
    pub week_ends_on: Weekday,
    #[serde(default = "default_negative_time_policy")]
    pub negative_time_policy: NegativeTimePolicy,
}

fn default_min_days() -> u32 {
    21
}

fn default_cap_n() -> usize {
    6
}

fn default_cap_m() -> usize {
    3
}

fn default_threshold() -> u32 {
    5
}

fn default_week_end() -> Weekday {
    Weekday::Sun
}

fn default_negative_time_policy() -> NegativeTimePolicy {
    NegativeTimePolicy::Keep
}

impl StudyConfig {
    /// The configuration of the deployed study.
    pub fn default_study() -> Self {
        StudyConfig {
            start_date: NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2021, 11, 28).unwrap(),
            min_days_between_occurrences: default_min_days(),
            max_occurrences_frequent: default_cap_n(),
            max_occurrences_infrequent: default_cap_m(),
            redaction_threshold: default_threshold(),
            week_ends_on: default_week_end(),
            negative_time_policy: default_negative_time_policy(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: StudyConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read config from \"{}\"", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config in \"{}\"", path.display()))
    }

    /// Check the configuration is usable. Called on every load; a failure here is fatal.
    pub fn validate(&self) -> Result {
        ensure!(
            self.start_date <= self.end_date,
            "start_date ({}) is after end_date ({})",
            self.start_date,
            self.end_date
        );
        ensure!(
            self.redaction_threshold > 0,
            "redaction_threshold must be positive (got {})",
            self.redaction_threshold
        );
        ensure!(
            self.max_occurrences_frequent >= 1 && self.max_occurrences_infrequent >= 1,
            "occurrence caps must be at least 1 (got n={}, m={})",
            self.max_occurrences_frequent,
            self.max_occurrences_infrequent
        );
        Ok(())
    }

    /// Number of days in `[start_date, end_date]` inclusive.
    pub fn num_days(&self) -> usize {
        (self.end_date - self.start_date).num_days() as usize + 1
    }
}
