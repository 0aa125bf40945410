// src/sanitize/mod.rs
pub mod values;

use anyhow::{Context, Result};
use duckdb::{params, Transaction};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument};

use crate::config::Config;
use crate::store::Store;
use values::{parse_build_year, parse_damage_cents, parse_firstuse_year};

/// One materialized leaderboard row: per-country rank by average normalized
/// damage for a (make, model) group.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub country: String,
    pub make: String,
    pub model: String,
    pub avg_damage: f64,
    pub rank: i64,
}

/// What one pipeline run did, for reporting.
#[derive(Debug)]
pub struct PipelineSummary {
    pub quarantined: usize,
    pub corrected: usize,
    pub nulled: usize,
    pub normalized: usize,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Run the five sanitization steps as one transaction against the store.
///
/// Order matters: weird build years are quarantined before they are
/// corrected so the pre-correction value survives for audit, and empty
/// damage amounts become NULL before anything casts them. Any failure rolls
/// the whole run back; readers never observe a partially sanitized state.
#[instrument(level = "info", skip(store, cfg))]
pub fn run_pipeline(store: &mut Store, cfg: &Config) -> Result<PipelineSummary> {
    let tx = store.transaction()?;

    let quarantined = quarantine_weird_years(&tx, cfg)?;
    let corrected = correct_build_years(&tx, cfg)?;
    let nulled = null_empty_damage(&tx)?;
    let normalized = normalize_damage(&tx)?;
    let leaderboard = materialize_leaderboard(&tx, cfg)?;

    tx.commit().context("committing sanitization pipeline")?;

    info!(
        quarantined,
        corrected,
        nulled,
        normalized,
        entries = leaderboard.len(),
        "sanitization pipeline committed"
    );
    Ok(PipelineSummary {
        quarantined,
        corrected,
        nulled,
        normalized,
        leaderboard,
    })
}

fn build_year_out_of_range(raw: &str, cfg: &Config) -> bool {
    match parse_build_year(raw) {
        Some(year) => year < cfg.min_year || year > cfg.max_year,
        // fails the cast, treated as out of range
        None => true,
    }
}

struct WeirdRow {
    country: String,
    vehicle_id: String,
    licence: String,
    build_year: String,
    firstuse: String,
}

fn select_weird_rows(tx: &Transaction, cfg: &Config) -> Result<Vec<WeirdRow>> {
    let mut stmt =
        tx.prepare("SELECT country, vehicle_id, licence, build_year, firstuse FROM vehicles")?;
    let rows = stmt.query_map([], |row| {
        Ok(WeirdRow {
            country: row.get(0)?,
            vehicle_id: row.get(1)?,
            licence: row.get(2)?,
            build_year: row.get(3)?,
            firstuse: row.get(4)?,
        })
    })?;

    let mut weird = Vec::new();
    for row in rows {
        let row = row?;
        if build_year_out_of_range(&row.build_year, cfg) {
            weird.push(row);
        }
    }
    Ok(weird)
}

/// Step 1: log every implausible build year into the quarantine table, with
/// its pre-correction value.
fn quarantine_weird_years(tx: &Transaction, cfg: &Config) -> Result<usize> {
    let weird = select_weird_rows(tx, cfg)?;
    let mut insert = tx.prepare("INSERT INTO weird_years VALUES (?, ?, ?, ?)")?;
    for row in &weird {
        insert.execute(params![row.country, row.vehicle_id, row.licence, row.build_year])?;
    }
    Ok(weird.len())
}

/// Step 2: overwrite quarantined build years with the year of first use. A
/// firstuse that does not parse as a date leaves the anomaly in place.
fn correct_build_years(tx: &Transaction, cfg: &Config) -> Result<usize> {
    let weird = select_weird_rows(tx, cfg)?;
    let mut update = tx.prepare(
        "UPDATE vehicles SET build_year = ? \
         WHERE country = ? AND vehicle_id = ? AND licence = ?",
    )?;
    let mut corrected = 0;
    for row in &weird {
        if let Some(year) = parse_firstuse_year(&row.firstuse) {
            update.execute(params![
                year.to_string(),
                row.country,
                row.vehicle_id,
                row.licence
            ])?;
            corrected += 1;
        }
    }
    Ok(corrected)
}

/// Step 3: empty damage amounts become NULL. Must run before any numeric
/// cast of the column.
fn null_empty_damage(tx: &Transaction) -> Result<usize> {
    tx.execute(
        "UPDATE vehicles SET amount_damage = NULL WHERE amount_damage = ''",
        [],
    )
    .map_err(Into::into)
}

/// Step 4: per-country min/max scaling of the damage amount into the
/// reserved normalization column.
fn normalize_damage(tx: &Transaction) -> Result<usize> {
    struct DamageRow {
        country: String,
        vehicle_id: String,
        licence: String,
        cents: i64,
    }

    // validation pass first: every remaining damage value must cast before
    // any aggregate is computed from it
    let mut stmt = tx.prepare(
        "SELECT country, vehicle_id, licence, amount_damage FROM vehicles \
         WHERE amount_damage IS NOT NULL",
    )?;
    let raw_rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    let mut rows = Vec::new();
    for raw in raw_rows {
        let (country, vehicle_id, licence, amount) = raw?;
        let cents = parse_damage_cents(&amount)?;
        rows.push(DamageRow {
            country,
            vehicle_id,
            licence,
            cents,
        });
    }

    let mut ranges: HashMap<String, (i64, i64)> = HashMap::new();
    for row in &rows {
        let range = ranges
            .entry(row.country.clone())
            .or_insert((row.cents, row.cents));
        range.0 = range.0.min(row.cents);
        range.1 = range.1.max(row.cents);
    }

    let mut update = tx.prepare(
        "UPDATE vehicles SET amount_damage_norm = ? \
         WHERE country = ? AND vehicle_id = ? AND licence = ?",
    )?;
    for row in &rows {
        let (min, max) = ranges[&row.country];
        let norm = normalized_value(row.cents, min, max);
        update.execute(params![norm, row.country, row.vehicle_id, row.licence])?;
    }
    Ok(rows.len())
}

/// Min/max scaling with the two degenerate denominators substituted away: an
/// all-zero country uses 1 as its effective max, and a zero-range country
/// maps every value to 0.
fn normalized_value(cents: i64, min: i64, max: i64) -> f64 {
    let effective_max = if max == 0 { 100 } else { max };
    if effective_max == min {
        return 0.0;
    }
    (cents - min) as f64 / (effective_max - min) as f64
}

/// Step 5: recompute the per-country leaderboard and replace the table's
/// contents with it.
fn materialize_leaderboard(tx: &Transaction, cfg: &Config) -> Result<Vec<LeaderboardEntry>> {
    let mut stmt = tx.prepare(
        "SELECT country, make, model, amount_damage_norm FROM vehicles \
         WHERE build_year = ? AND make <> '' AND model <> '' \
         AND amount_damage_norm IS NOT NULL",
    )?;
    let rows = stmt.query_map(params![cfg.leaderboard_year.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
        ))
    })?;

    // group averages; BTreeMap keeps the materialization order stable
    let mut groups: BTreeMap<(String, String, String), (f64, u32)> = BTreeMap::new();
    for row in rows {
        let (country, make, model, norm) = row?;
        let group = groups.entry((country, make, model)).or_insert((0.0, 0));
        group.0 += norm;
        group.1 += 1;
    }

    let mut per_country: BTreeMap<String, Vec<(String, String, f64)>> = BTreeMap::new();
    for ((country, make, model), (sum, count)) in groups {
        per_country
            .entry(country)
            .or_default()
            .push((make, model, sum / f64::from(count)));
    }

    let mut entries = Vec::new();
    for (country, country_groups) in per_country {
        for (make, model, avg) in &country_groups {
            // rank with gaps: ties share a rank, the next distinct average
            // skips by the size of the tie group
            let rank = 1 + country_groups
                .iter()
                .filter(|other| other.2 > *avg)
                .count() as i64;
            if rank <= cfg.top_n as i64 {
                entries.push(LeaderboardEntry {
                    country: country.clone(),
                    make: make.clone(),
                    model: model.clone(),
                    avg_damage: *avg,
                    rank,
                });
            }
        }
    }
    entries.sort_by(|a, b| {
        (a.country.as_str(), a.rank, a.make.as_str()).cmp(&(b.country.as_str(), b.rank, b.make.as_str()))
    });

    tx.execute("DELETE FROM leaderboard", [])?;
    let mut insert = tx.prepare("INSERT INTO leaderboard VALUES (?, ?, ?, ?, ?)")?;
    for entry in &entries {
        insert.execute(params![
            entry.country,
            entry.make,
            entry.model,
            entry.avg_damage,
            entry.rank
        ])?;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{vehicle_column, Table, VEHICLE_COLUMNS};

    fn vehicle(country: &str, id: &str, licence: &str, fields: &[(&str, &str)]) -> Vec<String> {
        let mut row = vec![country.to_string(), id.to_string(), licence.to_string()];
        row.resize(VEHICLE_COLUMNS.len(), String::new());
        for (name, value) in fields {
            row[vehicle_column(name)] = value.to_string();
        }
        row
    }

    fn store_with(rows: &[Vec<String>]) -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store.append(Table::Vehicles, rows).unwrap();
        store
    }

    fn query_strings(store: &Store, sql: &str) -> Vec<String> {
        let mut stmt = store.connection().prepare(sql).unwrap();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
        rows.map(Result::unwrap).collect()
    }

    fn query_count(store: &Store, sql: &str) -> i64 {
        store
            .connection()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn weird_year_is_quarantined_before_correction() {
        let mut store = store_with(&[vehicle(
            "NL",
            "123",
            "AB-01-C",
            &[("build_year", "2031"), ("firstuse", "2014-06-30")],
        )]);
        let summary = run_pipeline(&mut store, &Config::default()).unwrap();

        assert_eq!(summary.quarantined, 1);
        assert_eq!(summary.corrected, 1);
        // the quarantine log keeps the pre-correction value
        assert_eq!(
            query_strings(&store, "SELECT build_year FROM weird_years"),
            vec!["2031"]
        );
        assert_eq!(
            query_strings(&store, "SELECT build_year FROM vehicles"),
            vec!["2014"]
        );
    }

    #[test]
    fn non_numeric_build_year_fails_the_cast_and_is_quarantined() {
        let mut store = store_with(&[vehicle(
            "NL",
            "1",
            "X",
            &[("build_year", "19 96"), ("firstuse", "1996-01-15")],
        )]);
        let summary = run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(summary.quarantined, 1);
        assert_eq!(
            query_strings(&store, "SELECT build_year FROM vehicles"),
            vec!["1996"]
        );
    }

    #[test]
    fn unparseable_firstuse_leaves_the_anomaly_in_place() {
        let mut store = store_with(&[vehicle(
            "NL",
            "1",
            "X",
            &[("build_year", "2031"), ("firstuse", "unknown")],
        )]);
        let summary = run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(summary.quarantined, 1);
        assert_eq!(summary.corrected, 0);
        assert_eq!(
            query_strings(&store, "SELECT build_year FROM vehicles"),
            vec!["2031"]
        );
    }

    #[test]
    fn in_range_years_are_left_alone() {
        let mut store = store_with(&[vehicle(
            "NL",
            "1",
            "X",
            &[("build_year", "2016"), ("firstuse", "2014-06-30")],
        )]);
        let summary = run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(summary.quarantined, 0);
        assert_eq!(query_count(&store, "SELECT count(*) FROM weird_years"), 0);
    }

    #[test]
    fn empty_damage_becomes_null_and_is_skipped_by_normalization() {
        let mut store = store_with(&[
            vehicle("NL", "1", "X", &[("build_year", "2016"), ("amount_damage", "")]),
            vehicle(
                "NL",
                "2",
                "X",
                &[("build_year", "2016"), ("amount_damage", "10")],
            ),
        ]);
        let summary = run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(summary.nulled, 1);
        assert_eq!(summary.normalized, 1);
        assert_eq!(
            query_count(
                &store,
                "SELECT count(*) FROM vehicles WHERE amount_damage IS NULL \
                 AND amount_damage_norm IS NULL"
            ),
            1
        );
    }

    #[test]
    fn normalization_scales_per_country() {
        let mut store = store_with(&[
            vehicle("NL", "1", "X", &[("build_year", "2016"), ("amount_damage", "10")]),
            vehicle("NL", "2", "X", &[("build_year", "2016"), ("amount_damage", "20")]),
            vehicle("NL", "3", "X", &[("build_year", "2016"), ("amount_damage", "30")]),
            vehicle("DE", "1", "X", &[("build_year", "2016"), ("amount_damage", "100")]),
            vehicle("DE", "2", "X", &[("build_year", "2016"), ("amount_damage", "300")]),
        ]);
        run_pipeline(&mut store, &Config::default()).unwrap();

        let norms = |country: &str| -> Vec<f64> {
            let sql = format!(
                "SELECT amount_damage_norm FROM vehicles \
                 WHERE country = '{country}' ORDER BY vehicle_id"
            );
            let mut stmt = store.connection().prepare(&sql).unwrap();
            let rows = stmt.query_map([], |row| row.get::<_, f64>(0)).unwrap();
            rows.map(Result::unwrap).collect()
        };
        assert_eq!(norms("NL"), vec![0.0, 0.5, 1.0]);
        assert_eq!(norms("DE"), vec![0.0, 1.0]);
    }

    #[test]
    fn zero_range_country_normalizes_to_zero() {
        let mut store = store_with(&[
            vehicle("BE", "1", "X", &[("build_year", "2016"), ("amount_damage", "5")]),
            vehicle("BE", "2", "X", &[("build_year", "2016"), ("amount_damage", "5")]),
        ]);
        run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(
            query_count(
                &store,
                "SELECT count(*) FROM vehicles WHERE amount_damage_norm = 0"
            ),
            2
        );
    }

    #[test]
    fn all_zero_country_normalizes_to_zero() {
        let mut store = store_with(&[
            vehicle("BE", "1", "X", &[("build_year", "2016"), ("amount_damage", "0")]),
            vehicle("BE", "2", "X", &[("build_year", "2016"), ("amount_damage", "0")]),
        ]);
        run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(
            query_count(
                &store,
                "SELECT count(*) FROM vehicles WHERE amount_damage_norm = 0"
            ),
            2
        );
    }

    #[test]
    fn leaderboard_ranks_with_gaps() {
        // four make/model groups in NL, middle two tied on average
        let mut store = store_with(&[
            vehicle("NL", "1", "X", &[
                ("build_year", "2016"), ("make", "A"), ("model", "a"), ("amount_damage", "30"),
            ]),
            vehicle("NL", "2", "X", &[
                ("build_year", "2016"), ("make", "B"), ("model", "b"), ("amount_damage", "20"),
            ]),
            vehicle("NL", "3", "X", &[
                ("build_year", "2016"), ("make", "C"), ("model", "c"), ("amount_damage", "20"),
            ]),
            vehicle("NL", "4", "X", &[
                ("build_year", "2016"), ("make", "D"), ("model", "d"), ("amount_damage", "10"),
            ]),
        ]);
        let summary = run_pipeline(&mut store, &Config::default()).unwrap();

        let ranks: Vec<(String, i64)> = summary
            .leaderboard
            .iter()
            .map(|entry| (entry.make.clone(), entry.rank))
            .collect();
        assert_eq!(
            ranks,
            vec![
                ("A".to_string(), 1),
                ("B".to_string(), 2),
                ("C".to_string(), 2),
                ("D".to_string(), 4),
            ]
        );
    }

    #[test]
    fn leaderboard_filters_year_and_empty_make_model() {
        let mut store = store_with(&[
            vehicle("NL", "1", "X", &[
                ("build_year", "2015"), ("make", "A"), ("model", "a"), ("amount_damage", "30"),
            ]),
            vehicle("NL", "2", "X", &[
                ("build_year", "2016"), ("make", ""), ("model", "b"), ("amount_damage", "20"),
            ]),
            vehicle("NL", "3", "X", &[
                ("build_year", "2016"), ("make", "C"), ("model", "c"), ("amount_damage", "10"),
            ]),
        ]);
        let summary = run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(summary.leaderboard.len(), 1);
        assert_eq!(summary.leaderboard[0].make, "C");
    }

    #[test]
    fn leaderboard_honors_top_n_cutoff() {
        let mut store = store_with(&[
            vehicle("NL", "1", "X", &[
                ("build_year", "2016"), ("make", "A"), ("model", "a"), ("amount_damage", "30"),
            ]),
            vehicle("NL", "2", "X", &[
                ("build_year", "2016"), ("make", "B"), ("model", "b"), ("amount_damage", "20"),
            ]),
            vehicle("NL", "3", "X", &[
                ("build_year", "2016"), ("make", "C"), ("model", "c"), ("amount_damage", "10"),
            ]),
        ]);
        let cfg = Config {
            top_n: 1,
            ..Config::default()
        };
        let summary = run_pipeline(&mut store, &cfg).unwrap();
        assert_eq!(summary.leaderboard.len(), 1);
        assert_eq!(summary.leaderboard[0].rank, 1);
    }

    #[test]
    fn leaderboard_is_fully_replaced_each_run() {
        let mut store = store_with(&[vehicle("NL", "1", "X", &[
            ("build_year", "2016"), ("make", "A"), ("model", "a"), ("amount_damage", "30"),
        ])]);
        run_pipeline(&mut store, &Config::default()).unwrap();
        assert_eq!(query_count(&store, "SELECT count(*) FROM leaderboard"), 1);

        // a later load shifts the groups; the old materialization must not linger
        store
            .append(
                Table::Vehicles,
                &[vehicle("NL", "2", "X", &[
                    ("build_year", "2016"), ("make", "B"), ("model", "b"), ("amount_damage", "40"),
                ])],
            )
            .unwrap();
        run_pipeline(&mut store, &Config::default()).unwrap();

        let leaders = query_strings(
            &store,
            "SELECT make FROM leaderboard ORDER BY \"rank\"",
        );
        assert_eq!(leaders, vec!["B", "A"]);
    }

    #[test]
    fn cast_error_rolls_back_the_whole_run() {
        let mut store = store_with(&[
            vehicle("NL", "1", "X", &[
                ("build_year", "2031"), ("firstuse", "2014-06-30"), ("amount_damage", "10"),
            ]),
            vehicle("NL", "2", "X", &[
                ("build_year", "2016"), ("amount_damage", "not a number"),
            ]),
        ]);
        let err = run_pipeline(&mut store, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("amount_damage"));

        // earlier steps must not have committed
        assert_eq!(query_count(&store, "SELECT count(*) FROM weird_years"), 0);
        assert_eq!(
            query_strings(
                &store,
                "SELECT build_year FROM vehicles WHERE vehicle_id = '1'"
            ),
            vec!["2031"]
        );
    }
}
