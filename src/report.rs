//! Presentation tables: the per-category totals report and the weekly counts export.

use crate::{counts::WeeklyCountMatrix, output_path, ArcStr, Result};
use once_cell::sync::Lazy;
use qu::ick_use::*;
use std::{collections::BTreeMap, fs, path::Path};
use term_data_table::{Cell, Row, Table};

/// Static display metadata for one codelist-backed category.
#[derive(Debug, Clone, Copy)]
pub struct CodelistMeta {
    pub id: &'static str,
    pub category: &'static str,
    pub sub_category: &'static str,
    pub codelist: &'static str,
    pub description: &'static str,
    pub link: &'static str,
}

/// Display metadata for every codelist category, in report order.
pub static CODELIST_METADATA: &[CodelistMeta] = &[
    CodelistMeta {
        id: "probable_covid",
        category: "Probable case",
        sub_category: "Clinical code",
        codelist: "Probable case: clinical code",
        description: "Clinical diagnosis of COVID-19 made",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-probable-covid-clinical-code/2020-07-16/",
    },
    CodelistMeta {
        id: "probable_covid_pos_test",
        category: "",
        sub_category: "Positive test",
        codelist: "Probable case: positive test",
        description: "Record of positive test result for SARS-CoV-2 (active infection)",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-probable-covid-positive-test/2020-07-16/",
    },
    CodelistMeta {
        id: "probable_covid_sequelae",
        category: "",
        sub_category: "Sequalae",
        codelist: "Probable case: sequelae",
        description: "Symptom or condition recorded as secondary to SARS-CoV-2",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-probable-covid-sequelae/2020-07-16/",
    },
    CodelistMeta {
        id: "suspected_covid_advice",
        category: "Suspected case",
        sub_category: "Advice",
        codelist: "Suspected case: advice",
        description: "General advice given about SARS-CoV-2",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-suspected-covid-advice/2020-07-16/",
    },
    CodelistMeta {
        id: "suspected_covid_had_test",
        category: "",
        sub_category: "Had test",
        codelist: "Suspected case: had test",
        description: "Record of having had a test for active infection with SARS-CoV-2",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-suspected-covid-had-test/2020-07-16/",
    },
    CodelistMeta {
        id: "suspected_covid_isolation",
        category: "",
        sub_category: "Isolation code",
        codelist: "Suspected case: isolation code",
        description: "Self- or household-isolation recorded",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-suspected-covid-isolation-code/2020-07-16/",
    },
    CodelistMeta {
        id: "suspected_covid_nonspecific",
        category: "",
        sub_category: "Non-specific clinical assessment",
        codelist: "Suspected case: non-specific clinical assessment",
        description: "Clinical assessments plausibly related to COVID-19",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-suspected-covid-nonspecific-clinical-assessment/2020-07-16/",
    },
    CodelistMeta {
        id: "suspected_covid",
        category: "",
        sub_category: "Suspected codes",
        codelist: "Suspected case: suspected codes",
        description: "\"Suspect\" mentioned, or previous COVID-19 reported",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-suspected-codes-suspected-codes/2020-07-16/",
    },
    CodelistMeta {
        id: "suspected_covid_had_antigen_test",
        category: "",
        sub_category: "Had antigen test",
        codelist: "Suspected case: had antigen test",
        description: "Record of having had an antigen test for SARS-CoV-2",
        link: "https://codelists.opensafely.org/codelist/user/candrews/covid-identification-in-primary-care-suspected-covid-had-antigen-test/",
    },
    CodelistMeta {
        id: "historic_covid",
        category: "Historic case",
        sub_category: "-",
        codelist: "Historic case",
        description: "SARS-CoV-2 antibodies or immunity recorded",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-historic-case/2020-06-23/",
    },
    CodelistMeta {
        id: "potential_historic_covid",
        category: "Potential historic case",
        sub_category: "-",
        codelist: "Potential historic case",
        description: "Has had a test for SARS-CoV-2 antibodies",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-potential-historic-case/2020-06-23/",
    },
    CodelistMeta {
        id: "exposure_to_disease",
        category: "Exposure to disease",
        sub_category: "-",
        codelist: "Exposure to disease",
        description: "Record of contact/exposure/procedure",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-exposure-to-disease/2020-06-23/",
    },
    CodelistMeta {
        id: "antigen_negative",
        category: "Antigen test negative",
        sub_category: "-",
        codelist: "Antigen test negative",
        description: "Record of negative test result for SARS-CoV-2",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-antigen-test-negative/2020-06-24/",
    },
    CodelistMeta {
        id: "covid_unrelated_to_case_status",
        category: "COVID-19 related but case status not specified",
        sub_category: "-",
        codelist: "COVID-19 related but case status not specified",
        description: "Healthcare contact related to COVID-19 but not case status",
        link: "https://codelists.opensafely.org/codelist/opensafely/covid-identification-in-primary-care-unrelated-to-case-status/2020-06-23/",
    },
];

static METADATA_INDEX: Lazy<BTreeMap<&'static str, &'static CodelistMeta>> =
    Lazy::new(|| CODELIST_METADATA.iter().map(|meta| (meta.id, meta)).collect());

pub fn metadata(id: &str) -> Option<&'static CodelistMeta> {
    METADATA_INDEX.get(id).copied()
}

/// One row of the totals report: metadata joined with the (already redacted) count.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub meta: &'static CodelistMeta,
    /// `None` means the count was redacted.
    pub count: Option<u64>,
}

/// The per-category totals report.
#[derive(Debug)]
pub struct ReportTable {
    rows: Vec<ReportRow>,
}

impl ReportTable {
    /// Join redacted totals with the static metadata.
    ///
    /// A counted category with no metadata entry means the configuration and the
    /// metadata table have drifted apart; that's fatal and reported by name, never
    /// silently dropped.
    pub fn build(totals: &[(ArcStr, Option<u64>)]) -> Result<Self> {
        let by_id: BTreeMap<&str, Option<u64>> = totals
            .iter()
            .map(|(category, count)| (&**category, *count))
            .collect();
        for (category, _) in totals {
            ensure!(
                metadata(category).is_some(),
                "no codelist metadata for counted category \"{}\"",
                category
            );
        }
        // metadata order, restricted to the categories actually counted
        let rows = CODELIST_METADATA
            .iter()
            .filter_map(|meta| {
                by_id.get(meta.id).map(|count| ReportRow {
                    meta,
                    count: *count,
                })
            })
            .collect();
        Ok(ReportTable { rows })
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn term_table(&self) -> Table {
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Category"))
                .with_cell(Cell::from("Sub-category"))
                .with_cell(Cell::from("Codelist"))
                .with_cell(Cell::from("Description"))
                .with_cell(Cell::from("Count")),
        );
        for row in &self.rows {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(row.meta.category))
                    .with_cell(Cell::from(row.meta.sub_category))
                    .with_cell(Cell::from(row.meta.codelist))
                    .with_cell(Cell::from(row.meta.description))
                    .with_cell(Cell::from(match row.count {
                        Some(count) => count.to_string(),
                        None => "-".to_string(),
                    })),
            );
        }
        table
    }

    /// Write the report as CSV, redacted counts left empty.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result {
        let path = output_path(path.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("unable to write report to \"{}\"", path.display()))?;
        writer.write_record([
            "Category",
            "Sub-category",
            "Codelist",
            "Description",
            "link",
            "Count",
        ])?;
        for row in &self.rows {
            let count = row.count.map(|c| c.to_string()).unwrap_or_default();
            writer.write_record([
                row.meta.category,
                row.meta.sub_category,
                row.meta.codelist,
                row.meta.description,
                row.meta.link,
                count.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Write a weekly count matrix as CSV: one `date` column of period-end labels, one column
/// per category.
pub fn write_weekly_csv(matrix: &WeeklyCountMatrix, path: impl AsRef<Path>) -> Result {
    let path = output_path(path.as_ref());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("unable to write weekly counts to \"{}\"", path.display()))?;
    let mut header = vec!["date".to_string()];
    header.extend(matrix.columns.iter().map(|(category, _)| category.to_string()));
    writer.write_record(&header)?;
    for (idx, period_end) in matrix.period_ends.iter().enumerate() {
        let mut record = vec![period_end.to_string()];
        record.extend(
            matrix
                .columns
                .iter()
                .map(|(_, counts)| counts[idx].to_string()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
