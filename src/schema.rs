//! The typed schema of the cohort extract.
//!
//! The extractor emits one column per (category, occurrence index) pair, named
//! `{category}_X{i}_date` with `i` starting at 1. Rather than discovering these columns by
//! string matching at aggregation time, we build the full expected column list up front
//! from the configuration and check it against the actual file header before reading any
//! rows. A mismatch is a configuration error, reported with the missing column names.

use crate::config::StudyConfig;
use qu::ick_use::*;
use std::collections::BTreeSet;

/// Where a category's events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Coded events in the primary care record, selected by a codelist.
    PrimaryCare,
    /// Positive test results reported through SGSS.
    Sgss,
}

/// Which occurrence cap applies to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cap {
    /// The higher cap (`n`), for categories where repeat events are common.
    N,
    /// The lower cap (`m`).
    M,
}

/// A tracked class of clinical event. Static; fixed at configuration time.
#[derive(Debug, Clone, Copy)]
pub struct CategoryDef {
    pub id: &'static str,
    pub source: Source,
    pub cap: Cap,
}

/// Every category tracked by the study, in report order.
pub const CATEGORIES: &[CategoryDef] = &[
    CategoryDef {
        id: "probable_covid",
        source: Source::PrimaryCare,
        cap: Cap::M,
    },
    CategoryDef {
        id: "probable_covid_pos_test",
        source: Source::PrimaryCare,
        cap: Cap::N,
    },
    CategoryDef {
        id: "probable_covid_sequelae",
        source: Source::PrimaryCare,
        cap: Cap::N,
    },
    CategoryDef {
        id: "suspected_covid_advice",
        source: Source::PrimaryCare,
        cap: Cap::M,
    },
    CategoryDef {
        id: "suspected_covid_had_test",
        source: Source::PrimaryCare,
        cap: Cap::M,
    },
    CategoryDef {
        id: "suspected_covid_isolation",
        source: Source::PrimaryCare,
        cap: Cap::N,
    },
    CategoryDef {
        id: "suspected_covid_nonspecific",
        source: Source::PrimaryCare,
        cap: Cap::N,
    },
    CategoryDef {
        id: "suspected_covid",
        source: Source::PrimaryCare,
        cap: Cap::M,
    },
    CategoryDef {
        id: "suspected_covid_had_antigen_test",
        source: Source::PrimaryCare,
        cap: Cap::N,
    },
    CategoryDef {
        id: "historic_covid",
        source: Source::PrimaryCare,
        cap: Cap::N,
    },
    CategoryDef {
        id: "potential_historic_covid",
        source: Source::PrimaryCare,
        cap: Cap::M,
    },
    CategoryDef {
        id: "exposure_to_disease",
        source: Source::PrimaryCare,
        cap: Cap::N,
    },
    CategoryDef {
        id: "antigen_negative",
        source: Source::PrimaryCare,
        cap: Cap::M,
    },
    CategoryDef {
        id: "covid_unrelated_to_case_status",
        source: Source::PrimaryCare,
        cap: Cap::M,
    },
    CategoryDef {
        id: "sgss_positive_test",
        source: Source::Sgss,
        cap: Cap::N,
    },
];

pub fn category(id: &str) -> Option<&'static CategoryDef> {
    CATEGORIES.iter().find(|def| def.id == id)
}

/// Fixed (non-repeated) columns we expect in every extract.
pub const FIXED_COLUMNS: &[&str] = &[
    "patient_id",
    "age",
    "sex",
    "stp",
    "region",
    "died_ons",
    "died_ons_covid",
    "died_ons_covid_underlying",
    "died_ons_noncovid",
    "date_died_ons",
];

/// The occurrence columns for one category, in occurrence order.
#[derive(Debug, Clone)]
pub struct CategoryColumns {
    pub def: &'static CategoryDef,
    pub columns: Vec<String>,
}

/// The full expected column set, built once from the configuration.
#[derive(Debug, Clone)]
pub struct ExtractSchema {
    pub categories: Vec<CategoryColumns>,
}

impl ExtractSchema {
    pub fn build(config: &StudyConfig) -> Self {
        let categories = CATEGORIES
            .iter()
            .map(|def| {
                let cap = match def.cap {
                    Cap::N => config.max_occurrences_frequent,
                    Cap::M => config.max_occurrences_infrequent,
                };
                CategoryColumns {
                    def,
                    columns: (1..=cap)
                        .map(|i| format!("{}_X{}_date", def.id, i))
                        .collect(),
                }
            })
            .collect();
        ExtractSchema { categories }
    }

    /// Check that every expected column is present in the file header.
    ///
    /// Extra columns are tolerated (the extractor is free to add variables we don't use).
    pub fn validate(&self, headers: &csv::StringRecord) -> Result {
        let present: BTreeSet<&str> = headers.iter().map(str::trim).collect();
        let mut missing: Vec<&str> = Vec::new();
        for col in FIXED_COLUMNS {
            if !present.contains(col) {
                missing.push(col);
            }
        }
        for cat in &self.categories {
            for col in &cat.columns {
                if !present.contains(col.as_str()) {
                    missing.push(col);
                }
            }
        }
        ensure!(
            missing.is_empty(),
            "extract is missing expected columns: {}",
            missing.join(", ")
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::StudyConfig;

    fn full_header() -> csv::StringRecord {
        let config = StudyConfig::default_study();
        let schema = ExtractSchema::build(&config);
        let mut cols: Vec<String> = FIXED_COLUMNS.iter().map(|s| s.to_string()).collect();
        for cat in &schema.categories {
            cols.extend(cat.columns.iter().cloned());
        }
        csv::StringRecord::from(cols)
    }

    #[test]
    fn builds_capped_column_lists() {
        let config = StudyConfig::default_study();
        let schema = ExtractSchema::build(&config);
        let pos_test = schema
            .categories
            .iter()
            .find(|c| c.def.id == "probable_covid_pos_test")
            .unwrap();
        assert_eq!(pos_test.columns.len(), config.max_occurrences_frequent);
        assert_eq!(pos_test.columns[0], "probable_covid_pos_test_X1_date");
        let probable = schema
            .categories
            .iter()
            .find(|c| c.def.id == "probable_covid")
            .unwrap();
        assert_eq!(probable.columns.len(), config.max_occurrences_infrequent);
    }

    #[test]
    fn validate_accepts_full_header() {
        let config = StudyConfig::default_study();
        let schema = ExtractSchema::build(&config);
        schema.validate(&full_header()).unwrap();
    }

    #[test]
    fn validate_names_missing_columns() {
        let config = StudyConfig::default_study();
        let schema = ExtractSchema::build(&config);
        let header = csv::StringRecord::from(vec!["patient_id", "age"]);
        let err = schema.validate(&header).unwrap_err();
        assert!(err.to_string().contains("date_died_ons"));
        assert!(err.to_string().contains("sgss_positive_test_X1_date"));
    }
}
