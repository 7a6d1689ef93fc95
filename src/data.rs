//! Candle data on disk
//!
//! Offline scans read `datetime,open,high,low,close,volume` CSV files; the
//! `scan` command can also save what it fetched from a venue in the same
//! format.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fs::File;
use std::path::Path;

use crate::Candle;

/// Load OHLCV data from CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str).with_context(|| format!("Failed to parse datetime: {}", dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse {} on row {}", name, row_idx + 1))
        };

        candles.push(Candle::new_unchecked(
            datetime,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        ));
    }

    let report = validate_candles(&candles);
    if !report.is_valid() {
        bail!("{}: {}", path.display(), report.errors.join("; "));
    }
    for warning in &report.warnings {
        tracing::warn!("{}: {}", path.display(), warning);
    }
    Ok(candles)
}

/// RFC 3339, `%Y-%m-%d %H:%M:%S`, `%Y-%m-%d` or unix seconds, all UTC
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(ndt.and_utc());
        }
    }
    let secs: i64 = s.parse().context("unrecognized datetime format")?;
    DateTime::from_timestamp(secs, 0).context("timestamp out of range")
}

pub fn save_csv(candles: &[Candle], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;
    for c in candles {
        writer.write_record([
            c.datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
            c.volume.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Validate candle data for consistency
pub fn validate_candles(candles: &[Candle]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if candles.is_empty() {
        errors.push("No candles provided".to_string());
        return ValidationResult { errors, warnings };
    }

    for (i, candle) in candles.iter().enumerate() {
        if let Err(e) = candle.validate() {
            errors.push(format!("Candle {} ({}): {}", i, candle.datetime, e));
        }
        if i > 0 && candle.datetime <= candles[i - 1].datetime {
            warnings.push(format!("Candle {}: not chronological", i));
        }
    }

    ValidationResult { errors, warnings }
}

/// Result of data validation
#[derive(Debug)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn test_load_csv_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("EUR_USD.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "datetime,open,high,low,close,volume").unwrap();
        writeln!(f, "2024-03-01 00:00:00,1.08,1.09,1.07,1.085,1200").unwrap();
        writeln!(f, "2024-03-01T00:15:00Z,1.085,1.088,1.082,1.087,900").unwrap();
        writeln!(f, "1709252100,1.087,1.090,1.086,1.089,1000").unwrap();
        drop(f);

        let candles = load_csv(&path).unwrap();
        assert_eq!(candles.len(), 3);
        assert_relative_eq!(candles[0].close, 1.085);
        assert_eq!(candles[2].datetime.timestamp(), 1709252100);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/BTC-USD.csv");
        let t0 = parse_datetime("2024-01-01").unwrap();
        let candles: Vec<Candle> = (0..4)
            .map(|i| {
                let p = 40_000.0 + i as f64 * 10.0;
                Candle::new_unchecked(t0 + chrono::Duration::minutes(15 * i), p, p + 5.0, p - 5.0, p + 1.0, 2.5)
            })
            .collect();
        save_csv(&candles, &path).unwrap();
        let loaded = load_csv(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[3].datetime, candles[3].datetime);
    }

    #[test]
    fn test_invalid_rows_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "datetime,open,high,low,close,volume\n2024-01-01,10,9,11,10,1\n").unwrap();
        let err = load_csv(&path).unwrap_err();
        assert!(err.to_string().contains("high"));

        let result = validate_candles(&[]);
        assert!(!result.is_valid());
    }
}
