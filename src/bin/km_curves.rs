use clap::Parser;
use covid_identification_analysis::{
    header, output_path,
    survival::{DeathCause, KmCurve, SurvivalRecords},
    DeathCategory, Extract, StudyConfig,
};
use qu::ick_use::*;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use term_data_table::{Cell, Row, Table};

/// Kaplan-Meier survival after a positive SARS-CoV-2 test, stratified by where the test
/// was recorded (primary care or SGSS) and by cause of death.
#[derive(Parser)]
struct Opt {
    /// Study configuration TOML; the deployed study's defaults when omitted
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Restrict the written curves to this many days of follow-up
    #[clap(long)]
    max_days: Option<i64>,
}

const INDEX_CATEGORIES: &[&str] = &["probable_covid_pos_test", "sgss_positive_test"];
const CAUSES: &[DeathCause] = &[DeathCause::Any, DeathCause::Covid, DeathCause::NonCovid];

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = match &opt.config {
        Some(path) => StudyConfig::load(path)?,
        None => StudyConfig::default_study(),
    };
    let extract = Extract::load("extract.bin")?;

    header("Cohort deaths");
    // B Tree so the categories come out in a stable order.
    let mut deaths: BTreeMap<DeathCategory, usize> = BTreeMap::new();
    for row in extract.iter() {
        *deaths.entry(row.death_category(config.end_date)).or_insert(0) += 1;
    }
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Status"))
            .with_cell(Cell::from("Count")),
    );
    for (category, count) in &deaths {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(category.to_string()))
                .with_cell(Cell::from(count.to_string())),
        );
    }
    println!("{}", table);

    for &index_category in INDEX_CATEGORIES {
        let records = SurvivalRecords::derive(
            &extract,
            index_category,
            config.end_date,
            config.negative_time_policy,
        );
        if records.negative_dropped > 0 {
            event!(
                Level::WARN,
                "{}: dropped {} records with death recorded before the index event",
                index_category,
                records.negative_dropped
            );
        }
        if records.negative_clipped > 0 {
            event!(
                Level::WARN,
                "{}: clipped {} negative times to zero",
                index_category,
                records.negative_clipped
            );
        }

        header(&format!("{} ({} records)", index_category, records.len()));
        for &cause in CAUSES {
            let mut curve = records.km(cause)?;
            if let Some(max_days) = opt.max_days {
                curve = curve.clamp_to(max_days);
            }
            println!(
                "{}: {} events, {} curve points",
                cause.label(),
                records.events(cause),
                curve.len()
            );
            let name = format!("km_{}_{}.csv", index_category, cause.label());
            write_curve_csv(&curve, &name)?;
        }
    }
    Ok(())
}

fn write_curve_csv(curve: &KmCurve, name: &str) -> Result {
    let path = output_path(Path::new(name));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("unable to write curve to \"{}\"", path.display()))?;
    writer.write_record([
        "time",
        "at_risk",
        "died",
        "censored",
        "survival",
        "cumulative_incidence",
    ])?;
    for point in curve.iter() {
        writer.write_record([
            point.time.to_string(),
            point.at_risk.to_string(),
            point.died.to_string(),
            point.censored.to_string(),
            format!("{:.6}", point.estimate),
            format!("{:.6}", 1.0 - point.estimate),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
