use clap::Parser;
use covid_identification_analysis::{
    counts::{self, DailyCountSeries, WeeklyCountMatrix},
    header, redact,
    report::{self, ReportTable},
    schema::{self, Source},
    ArcStr, Extract, ExtractSchema, StudyConfig,
};
use qu::ick_use::*;
use std::path::PathBuf;

/// Weekly counts of COVID-19 identification codes across the cohort, with disclosure
/// control applied before anything is written out.
#[derive(Parser)]
struct Opt {
    /// Study configuration TOML; the deployed study's defaults when omitted
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Override the configured disclosure threshold
    #[clap(short, long)]
    threshold: Option<u32>,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let mut config = match &opt.config {
        Some(path) => StudyConfig::load(path)?,
        None => StudyConfig::default_study(),
    };
    if let Some(threshold) = opt.threshold {
        config.redaction_threshold = threshold;
        config.validate()?;
    }
    let schema = ExtractSchema::build(&config);
    let extract = Extract::load("extract.bin")?;
    event!(Level::INFO, "{} patients in extract", extract.len());

    let mut weekly = Vec::new();
    let mut outside_window = 0usize;
    for flat in counts::normalize_all(&extract, &schema) {
        // SGSS results feed the survival analysis, not the code counts report.
        let primary_care = schema::category(&flat.category)
            .map_or(false, |def| def.source == Source::PrimaryCare);
        if !primary_care {
            continue;
        }
        let daily = DailyCountSeries::from_dates(
            flat.dates.iter().map(|(_, date)| *date),
            config.start_date,
            config.end_date,
        )?;
        if daily.dropped() > 0 {
            event!(
                Level::DEBUG,
                "{}: {} events outside the study window",
                flat.category,
                daily.dropped()
            );
        }
        outside_window += daily.dropped();
        weekly.push((
            flat.category.clone(),
            daily.resample_weekly(config.week_ends_on),
        ));
    }
    if outside_window > 0 {
        event!(
            Level::INFO,
            "{} events fell outside {}..{} and were not counted",
            outside_window,
            config.start_date,
            config.end_date
        );
    }

    let matrix = WeeklyCountMatrix::from_series(weekly)?;
    let published = redact::suppress_matrix(&matrix, config.redaction_threshold);
    report::write_weekly_csv(&published, "codecounts_week.csv")?;

    // Cumulative totals are redacted-and-rounded independently of the weekly
    // suppression, from the raw counts.
    let raw_totals = matrix.totals();
    let values: Vec<u64> = raw_totals.iter().map(|(_, total)| *total).collect();
    let totals: Vec<(ArcStr, Option<u64>)> = raw_totals
        .iter()
        .map(|(category, _)| category.clone())
        .zip(redact::redact_and_round(
            &values,
            config.redaction_threshold,
        ))
        .collect();
    let table = ReportTable::build(&totals)?;

    header("Cumulative code counts");
    println!("{}", table.term_table());
    table.write_csv("tabledata.csv")?;

    Ok(())
}
