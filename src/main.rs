use anyhow::Result;
use carscraper::{
    config::Config,
    fetch,
    ingest::ingest_extracts,
    sanitize::run_pipeline,
    store::{Store, Table},
};
use glob::glob;
use reqwest::Client;
use std::{fs, path::PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    let cfg = Config::load("carscraper.yaml")?;

    // ─── 2) bootstrap data directory ─────────────────────────────────
    let data_dir = PathBuf::from(&cfg.data_dir);
    if data_dir.exists() {
        info!(dir = %data_dir.display(), "data directory already exists");
    } else {
        fs::create_dir_all(&data_dir)?;
        info!(dir = %data_dir.display(), "created data directory");
    }

    // ─── 3) download extracts ────────────────────────────────────────
    let client = Client::new();
    let downloaded = fetch::fetch_all(&client, &cfg.sources, &data_dir).await?;
    info!(count = downloaded.len(), "extracts available");

    // ─── 4) repair, route and dedup every extract on disk ───────────
    let pattern = format!("{}/*", data_dir.display());
    let paths: Vec<PathBuf> = glob(&pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    let batch = tokio::task::spawn_blocking(move || ingest_extracts(&paths)).await??;

    // ─── 5) load both destination sets ───────────────────────────────
    let mut store = Store::open(&cfg.db_path)?;
    if !store.is_initialized()? {
        info!("store is empty, creating tables");
    }
    store.init_schema()?;

    let inserted = store.append(Table::Vehicles, &batch.vehicles)?;
    info!(inserted, total = batch.vehicles.len(), "vehicle records loaded");
    let inserted = store.append(Table::Overflow, &batch.overflow)?;
    info!(inserted, total = batch.overflow.len(), "overflow records loaded");

    // ─── 6) sanitize + leaderboard ───────────────────────────────────
    let summary = run_pipeline(&mut store, &cfg)?;
    for entry in &summary.leaderboard {
        info!(
            country = %entry.country,
            rank = entry.rank,
            make = %entry.make,
            model = %entry.model,
            avg_damage = entry.avg_damage,
            "leaderboard entry"
        );
    }

    Ok(())
}
