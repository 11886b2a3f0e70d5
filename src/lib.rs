pub mod config;
pub mod counts;
pub mod redact;
pub mod report;
pub mod schema;
pub mod survival;
mod util;

pub use anyhow::{Context, Error};
use chrono::NaiveDate;
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    config::{NegativeTimePolicy, StudyConfig},
    schema::ExtractSchema,
    util::{header, path_exists},
};
use crate::util::{non_empty, parse_bool_01, parse_opt_date};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;

/// Sex is encoded 'M' or 'F' in the extract. Anything else is treated as missing; the
/// field is pass-through and not used by any computation here.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum Sex {
    Male,
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sex::Male => f.write_str("Male"),
            Sex::Female => f.write_str("Female"),
        }
    }
}

/// Cause-of-death classification for a patient, censored at the end of follow-up.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Ord, PartialOrd)]
pub enum DeathCategory {
    Alive,
    CovidDeath,
    NonCovidDeath,
    Unknown,
}

impl fmt::Display for DeathCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeathCategory::Alive => f.write_str("alive"),
            DeathCategory::CovidDeath => f.write_str("covid-death"),
            DeathCategory::NonCovidDeath => f.write_str("non-covid-death"),
            DeathCategory::Unknown => f.write_str("unknown"),
        }
    }
}

/// A row in the cohort extract: one patient, with their demographic pass-through fields,
/// every recorded occurrence date per tracked category, and death information.
///
/// Occurrence dates for a category are in occurrence order (non-decreasing, enforced
/// upstream); missing occurrences are `None` and stay that way, never fabricated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRow {
    pub patient_id: PatientId,
    pub age: Option<u16>,
    pub sex: Option<Sex>,
    pub stp: Option<ArcStr>,
    pub region: Option<ArcStr>,
    /// Keyed by category id; each value has one entry per occurrence column.
    pub category_dates: BTreeMap<ArcStr, Vec<Option<NaiveDate>>>,
    pub died_any: bool,
    pub died_covid: bool,
    pub died_covid_underlying: bool,
    pub died_noncovid: bool,
    pub death_date: Option<NaiveDate>,
}

impl ExtractRow {
    /// The non-null occurrence dates for one category, in occurrence order.
    pub fn dates_for(&self, category: &str) -> impl Iterator<Item = NaiveDate> + '_ {
        self.category_dates
            .get(category)
            .into_iter()
            .flat_map(|dates| dates.iter().copied().flatten())
    }

    /// Classify this patient's death, treating deaths after `end_of_follow_up` as
    /// censored (the patient counts as alive for this analysis).
    pub fn death_category(&self, end_of_follow_up: NaiveDate) -> DeathCategory {
        let died_in_window = matches!(self.death_date, Some(d) if d <= end_of_follow_up);
        if !died_in_window || !self.died_any {
            DeathCategory::Alive
        } else if self.died_covid {
            DeathCategory::CovidDeath
        } else if self.died_noncovid {
            DeathCategory::NonCovidDeath
        } else {
            DeathCategory::Unknown
        }
    }
}

/// The parsed extract, with a pre-built index for the `patient_id` field.
pub struct Extract {
    els: Arc<Vec<ExtractRow>>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl Extract {
    /// Parse the raw extract CSV. The header is validated against `schema` before any row
    /// is read, so a renamed or missing column fails fast with its name.
    ///
    /// Unparseable dates are treated as missing and counted; they don't abort the load.
    pub fn load_orig(path: impl AsRef<Path>, schema: &ExtractSchema) -> Result<Self> {
        let path = input_path(path.as_ref());
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&path)
            .with_context(|| format!("while opening \"{}\"", path.display()))?;
        let headers = reader.headers()?.clone();
        schema.validate(&headers)?;

        let col = |name: &str| -> usize {
            // validated above, so every expected name is present
            headers.iter().position(|h| h == name).unwrap()
        };
        let fixed: BTreeMap<&str, usize> = schema::FIXED_COLUMNS
            .iter()
            .map(|name| (*name, col(name)))
            .collect();
        let category_cols: Vec<(ArcStr, Vec<usize>)> = schema
            .categories
            .iter()
            .map(|cat| {
                let idxs = cat.columns.iter().map(|c| col(c)).collect();
                (ArcStr::from(cat.def.id), idxs)
            })
            .collect();

        let mut els = Vec::new();
        let mut bad_dates = 0usize;
        for (row_no, record) in reader.into_records().enumerate() {
            let record = record.with_context(|| format!("while reading \"{}\"", path.display()))?;
            let field = |idx: usize| record.get(idx).unwrap_or("");
            let mut date = |idx: usize| match parse_opt_date(field(idx)) {
                Ok(d) => d,
                Err(_) => {
                    bad_dates += 1;
                    None
                }
            };

            let mut category_dates = BTreeMap::new();
            for (id, idxs) in &category_cols {
                let dates: Vec<Option<NaiveDate>> = idxs.iter().map(|idx| date(*idx)).collect();
                category_dates.insert(id.clone(), dates);
            }
            let death_date = date(fixed["date_died_ons"]);

            let patient_id = field(fixed["patient_id"])
                .parse::<PatientId>()
                .with_context(|| format!("bad patient_id on row {}", row_no + 1))?;
            let bool_col = |name: &str| -> Result<bool> {
                parse_bool_01(field(fixed[name]))
                    .map_err(|e| format_err!("row {}, column {}: {}", row_no + 1, name, e))
            };

            els.push(ExtractRow {
                patient_id,
                age: field(fixed["age"]).parse().ok(),
                sex: match non_empty(field(fixed["sex"])) {
                    Some("M") | Some("m") => Some(Sex::Male),
                    Some("F") | Some("f") => Some(Sex::Female),
                    _ => None,
                },
                stp: non_empty(field(fixed["stp"])).map(ArcStr::from),
                region: non_empty(field(fixed["region"])).map(ArcStr::from),
                category_dates,
                died_any: bool_col("died_ons")?,
                died_covid: bool_col("died_ons_covid")?,
                died_covid_underlying: bool_col("died_ons_covid_underlying")?,
                died_noncovid: bool_col("died_ons_noncovid")?,
                death_date,
            });
        }
        if bad_dates > 0 {
            event!(
                Level::WARN,
                "{} unparseable dates in \"{}\" treated as missing",
                bad_dates,
                path.display()
            );
        }
        Ok(Self::new(els))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    pub fn find_by_id(&self, id: PatientId) -> Option<&ExtractRow> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractRow> + '_ {
        self.els.iter()
    }

    /// Get an `Extract` containing only rows that match the filter.
    pub fn filter(&self, f: impl Fn(&ExtractRow) -> bool) -> Self {
        Self::new(self.els.iter().filter(|row| f(row)).cloned().collect())
    }

    pub fn retain(&mut self, f: impl Fn(&ExtractRow) -> bool) {
        Arc::make_mut(&mut self.els).retain(f);
        self.rebuild_index();
    }

    pub fn new(els: Vec<ExtractRow>) -> Self {
        let mut this = Extract {
            els: Arc::new(els),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.insert(el.patient_id, idx);
        }
    }
}

impl Deref for Extract {
    type Target = [ExtractRow];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl FromIterator<ExtractRow> for Extract {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = ExtractRow>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// Load data into memory.
fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let reader = io::BufReader::new(fs::File::open(output_path(path))?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;
    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
fn save<T: Serialize>(contents: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &[T], path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        if util::path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;
    let path = output_path(path);
    inner(contents, &path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Note: No protection from escaping the root directory.
pub fn input_path(input: &Path) -> PathBuf {
    Path::new("output").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn output_path(input: &Path) -> PathBuf {
    Path::new("output").join(input)
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        counts::{self, DailyCountSeries, WeeklyCountMatrix},
        redact,
    };
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn repeat(date: NaiveDate, times: usize) -> impl Iterator<Item = NaiveDate> {
        std::iter::repeat(date).take(times)
    }

    /// A 20-patient cohort with the given event dates spread round-robin over the
    /// patients. How the dates are distributed doesn't affect the counts; the spread just
    /// keeps the fixture honest about events belonging to many patients.
    fn synth_extract(events: &[(&str, Vec<NaiveDate>)]) -> Extract {
        let mut rows: Vec<ExtractRow> = (1..=20)
            .map(|patient_id| ExtractRow {
                patient_id,
                age: None,
                sex: None,
                stp: None,
                region: None,
                category_dates: BTreeMap::new(),
                died_any: false,
                died_covid: false,
                died_covid_underlying: false,
                died_noncovid: false,
                death_date: None,
            })
            .collect();
        let n_rows = rows.len();
        for (category, dates) in events {
            for (idx, date) in dates.iter().enumerate() {
                rows[idx % n_rows]
                    .category_dates
                    .entry(ArcStr::from(*category))
                    .or_insert_with(Vec::new)
                    .push(Some(*date));
            }
        }
        Extract::new(rows)
    }

    #[test]
    fn extract_collection_ops() {
        let extract = synth_extract(&[]);
        assert_eq!(extract.len(), 20);
        assert!(extract.find_by_id(3).is_some());
        assert!(extract.find_by_id(21).is_none());

        let filtered = extract.filter(|row| row.patient_id <= 5);
        assert_eq!(filtered.len(), 5);

        let mut extract = extract;
        extract.retain(|row| row.patient_id > 10);
        assert_eq!(extract.len(), 10);
        assert!(extract.find_by_id(3).is_none());
        assert!(extract.find_by_id(11).is_some());
    }

    #[test]
    fn death_classification_censors_at_end_of_follow_up() {
        let end = d(2020, 6, 30);
        let patient = |patient_id, death_date: Option<NaiveDate>, covid, noncovid| ExtractRow {
            patient_id,
            age: None,
            sex: None,
            stp: None,
            region: None,
            category_dates: BTreeMap::new(),
            died_any: death_date.is_some(),
            died_covid: covid,
            died_covid_underlying: false,
            died_noncovid: noncovid,
            death_date,
        };
        let extract: Extract = [
            patient(1, None, false, false),
            patient(2, Some(d(2020, 5, 1)), true, false),
            patient(3, Some(d(2020, 5, 1)), false, true),
            // neither indicator set
            patient(4, Some(d(2020, 5, 1)), false, false),
            // died after the window: censored, counts as alive here
            patient(5, Some(d(2020, 7, 2)), true, false),
        ]
        .into_iter()
        .collect();

        let classify = |id| extract.find_by_id(id).unwrap().death_category(end);
        assert_eq!(classify(1), DeathCategory::Alive);
        assert_eq!(classify(2), DeathCategory::CovidDeath);
        assert_eq!(classify(3), DeathCategory::NonCovidDeath);
        assert_eq!(classify(4), DeathCategory::Unknown);
        assert_eq!(classify(5), DeathCategory::Alive);
    }

    // The whole aggregation path at once: flatten, daily counts, weekly resample,
    // suppression, totals. Weekly counts are chosen so the suppression has to absorb a
    // survivor (the 6) and so one category's total falls below the threshold entirely.
    #[test]
    fn pipeline_from_extract_to_published_counts() {
        // Mon 2020-02-03 .. Sun 2020-03-29: exactly 8 weeks ending on Sundays.
        let start = d(2020, 2, 3);
        let end = d(2020, 3, 29);

        // Weekly pattern for probable_covid: [3, 0, 6, 10, 2, 0, 8, 7].
        let mut probable: Vec<NaiveDate> = Vec::new();
        probable.extend([d(2020, 2, 3), d(2020, 2, 5), d(2020, 2, 9)]);
        probable.extend(repeat(d(2020, 2, 17), 2));
        probable.extend(repeat(d(2020, 2, 20), 2));
        probable.extend(repeat(d(2020, 2, 23), 2));
        probable.extend(repeat(d(2020, 2, 24), 5));
        probable.extend(repeat(d(2020, 2, 29), 3));
        probable.extend(repeat(d(2020, 3, 1), 2));
        probable.extend([d(2020, 3, 4), d(2020, 3, 8)]);
        probable.extend(repeat(d(2020, 3, 16), 4));
        probable.extend(repeat(d(2020, 3, 20), 4));
        probable.extend(repeat(d(2020, 3, 23), 3));
        probable.extend(repeat(d(2020, 3, 29), 4));
        // outside the window, in both directions
        probable.extend([d(2020, 1, 15), d(2020, 4, 1)]);

        // Weekly pattern for antigen_negative: [0, 0, 0, 0, 1, 1, 0, 0].
        let antigen = vec![d(2020, 3, 4), d(2020, 3, 10)];

        let extract = synth_extract(&[
            ("probable_covid", probable),
            ("antigen_negative", antigen),
        ]);

        let mut weekly = Vec::new();
        for category in ["probable_covid", "antigen_negative"] {
            let flat = counts::normalize_category(&extract, category);
            assert_eq!(flat.population, 20);
            let daily = DailyCountSeries::from_dates(
                flat.dates.iter().map(|(_, date)| *date),
                start,
                end,
            )
            .unwrap();
            if category == "probable_covid" {
                assert_eq!(daily.dropped(), 2);
                assert_eq!(daily.total(), 36);
            }
            weekly.push((flat.category, daily.resample_weekly(Weekday::Sun)));
        }

        let matrix = WeeklyCountMatrix::from_series(weekly).unwrap();
        assert_eq!(matrix.period_ends.len(), 8);
        assert_eq!(matrix.columns[0].1, vec![3, 0, 6, 10, 2, 0, 8, 7]);
        assert_eq!(matrix.columns[1].1, vec![0, 0, 0, 0, 1, 1, 0, 0]);

        // Policy A on each column: 3 and 2 are zeroed (sum 5, not above threshold), so
        // the smallest survivor 6 is absorbed too; the antigen column's whole total is
        // below the threshold and disappears.
        let published = redact::suppress_matrix(&matrix, 5);
        assert_eq!(published.columns[0].1, vec![0, 0, 0, 10, 0, 0, 8, 7]);
        assert_eq!(published.columns[1].1, vec![0; 8]);

        // Policy B on the (unsuppressed) totals: 36 rounds to 35, 2 is redacted.
        let totals = matrix.totals();
        assert_eq!(totals[0].1, 36);
        assert_eq!(totals[1].1, 2);
        let values: Vec<u64> = totals.iter().map(|(_, total)| *total).collect();
        assert_eq!(redact::redact_and_round(&values, 5), vec![Some(35), None]);
    }
}
