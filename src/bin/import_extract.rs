use clap::Parser;
use covid_identification_analysis::{
    output_path, path_exists, Extract, ExtractSchema, StudyConfig,
};
use qu::ick_use::*;
use std::path::{Path, PathBuf};

/// Parse the raw cohort extract and cache it as bincode for the analysis binaries.
#[derive(Parser)]
struct Opt {
    /// Study configuration TOML; the deployed study's defaults when omitted
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Extract CSV, relative to the output directory
    #[clap(short, long, default_value = "input.csv")]
    input: PathBuf,
    /// If set, allow overwriting an existing extract cache
    #[clap(long)]
    overwrite: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = match &opt.config {
        Some(path) => StudyConfig::load(path)?,
        None => StudyConfig::default_study(),
    };
    let schema = ExtractSchema::build(&config);

    let cache = output_path(Path::new("extract.bin"));
    if path_exists(&cache)? && !opt.overwrite {
        bail!(
            "\"{}\" already exists, pass --overwrite to replace it",
            cache.display()
        );
    }

    let extract = Extract::load_orig(&opt.input, &schema)?;
    event!(Level::INFO, "imported {} patients", extract.len());
    extract.save("extract.bin")?;
    Ok(())
}
