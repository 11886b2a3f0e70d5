use chrono::{NaiveDate, Weekday};
use serde::{de, Deserialize, Deserializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for parsing fields of the raw extract, which reach us as strings.

/// Parse a date in the extract's `YYYY-MM-DD` format, mapping the empty string to `None`.
pub fn parse_opt_date(s: &str) -> Result<Option<NaiveDate>, chrono::ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Some)
}

/// Parse a '1' to `true` and a '0' (or empty) to `false`.
pub fn parse_bool_01(s: &str) -> Result<bool, String> {
    match s.trim() {
        "" | "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("expected '0' or '1', got \"{}\"", other)),
    }
}

/// Trim a string, mapping "" and "null" to `None`.
pub fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(s)
    }
}

// Helpers for serde to parse config fields with quirks.

/// Parse a weekday name ("sun", "sunday", ...) from the config file.
pub fn weekday<'de, D>(d: D) -> Result<Weekday, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    s.parse::<Weekday>()
        .map_err(|_| de::Error::custom(format!("not a weekday: \"{}\"", s)))
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
