// src/config.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

/// Runtime configuration. Loaded from an optional YAML file; every field has
/// a default so a missing or partial file still yields a working setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// DuckDB database file.
    pub db_path: String,
    /// Directory the decompressed extracts land in.
    pub data_dir: String,
    /// Gzipped extract URLs to download.
    pub sources: Vec<String>,
    /// Lowest build year considered plausible.
    pub min_year: i32,
    /// Highest build year considered plausible.
    pub max_year: i32,
    /// Build year the leaderboard is computed for.
    pub leaderboard_year: i32,
    /// Leaderboard cutoff: groups ranked below this are not materialized.
    pub top_n: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: "carscraper.duckdb".into(),
            data_dir: "data".into(),
            sources: vec![
                "https://s3-eu-west-1.amazonaws.com/carnext-data-engineering-assignment/test_data/vehicle.csv0001_part_00.gz".into(),
            ],
            min_year: 1940,
            max_year: 2020,
            leaderboard_year: 2016,
            top_n: 10,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
