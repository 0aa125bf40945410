// src/store/mod.rs
use anyhow::{ensure, Context, Result};
use duckdb::types::Value;
use duckdb::{params_from_iter, Connection, Transaction};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::ingest::route::{OVERFLOW_WIDTH, VEHICLE_WIDTH};

/// Column layout of the vehicle table: the 36 business fields of the extract
/// plus the reserved `amount_damage_norm` slot filled by the sanitization
/// pipeline.
pub static VEHICLE_COLUMNS: [&str; VEHICLE_WIDTH] = [
    "country",
    "vehicle_id",
    "licence",
    "make",
    "model",
    "type",
    "trim",
    "colour",
    "bodytype",
    "fueltype",
    "engine_capacity",
    "engine_power",
    "cylindercapacity",
    "horsepower",
    "geartype",
    "number_of_gears",
    "emission_class",
    "emission_class_incl_co2",
    "co2_level_combined",
    "segmentation",
    "number_of_doors",
    "number_of_seats",
    "milage",
    "age",
    "firstuse",
    "build_year",
    "amount_damage",
    "price_class",
    "has_air_conditioning",
    "has_air_conditioning_automatic",
    "has_alloy_wheels",
    "has_automatic_transmission",
    "has_cruise_control",
    "has_heated_seats",
    "has_leather_alcantara",
    "has_leather_upholstery",
    "amount_damage_norm",
];

static VEHICLE_COLUMN_INDEX: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    VEHICLE_COLUMNS
        .iter()
        .enumerate()
        .map(|(index, &column)| (column, index))
        .collect()
});

/// Field index of a vehicle column. Unknown names are a programming error.
pub fn vehicle_column(name: &str) -> usize {
    *VEHICLE_COLUMN_INDEX
        .get(name)
        .unwrap_or_else(|| panic!("unknown vehicle column {name:?}"))
}

/// Destination tables the loader can append into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Vehicles,
    Overflow,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Vehicles => "vehicles",
            Table::Overflow => "overflow",
        }
    }

    fn width(self) -> usize {
        match self {
            Table::Vehicles => VEHICLE_WIDTH,
            Table::Overflow => OVERFLOW_WIDTH,
        }
    }
}

fn vehicles_create_sql() -> String {
    let columns: Vec<String> = VEHICLE_COLUMNS
        .iter()
        .map(|&column| match column {
            "amount_damage_norm" => format!("\"{column}\" DOUBLE"),
            _ => format!("\"{column}\" VARCHAR"),
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS vehicles ({}, PRIMARY KEY (country, vehicle_id, licence))",
        columns.join(", ")
    )
}

fn overflow_create_sql() -> String {
    let mut columns: Vec<String> = ["country", "vehicle_id", "licence"]
        .iter()
        .map(|column| format!("\"{column}\" VARCHAR"))
        .collect();
    columns.extend((4..=OVERFLOW_WIDTH).map(|i| format!("\"col{i:02}\" VARCHAR")));
    format!(
        "CREATE TABLE IF NOT EXISTS overflow ({}, PRIMARY KEY (country, vehicle_id, licence))",
        columns.join(", ")
    )
}

// Append-only quarantine log, deliberately without a primary key: one entry
// per offending record per sanitization run.
const WEIRD_YEARS_CREATE_SQL: &str = "CREATE TABLE IF NOT EXISTS weird_years (\
     \"country\" VARCHAR, \"vehicle_id\" VARCHAR, \"licence\" VARCHAR, \"build_year\" VARCHAR)";

const LEADERBOARD_CREATE_SQL: &str = "CREATE TABLE IF NOT EXISTS leaderboard (\
     \"country\" VARCHAR, \"make\" VARCHAR, \"model\" VARCHAR, \
     \"avg_damage\" DOUBLE, \"rank\" INTEGER, \
     PRIMARY KEY (country, make, model))";

/// Handle on the backing DuckDB database. Created once at process start and
/// passed to every stage that touches storage.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening database {}", path.as_ref().display()))?;
        Ok(Store { conn })
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        Ok(Store { conn })
    }

    /// Create the four tables if they do not exist yet.
    pub fn init_schema(&self) -> Result<()> {
        for sql in [
            vehicles_create_sql(),
            overflow_create_sql(),
            WEIRD_YEARS_CREATE_SQL.to_string(),
            LEADERBOARD_CREATE_SQL.to_string(),
        ] {
            self.conn
                .execute(&sql, [])
                .with_context(|| format!("executing: {sql}"))?;
        }
        Ok(())
    }

    /// Whether all four tables are present.
    pub fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_name IN ('vehicles', 'overflow', 'weird_years', 'leaderboard')",
            [],
            |row| row.get(0),
        )?;
        Ok(count == 4)
    }

    /// Append a batch of same-width records into `table`, skipping rows whose
    /// key already exists. Returns the number of rows actually inserted.
    ///
    /// Runs as one transaction so a failed batch leaves no partial load
    /// behind, while individual key conflicts never abort the batch.
    pub fn append(&mut self, table: Table, rows: &[Vec<String>]) -> Result<usize> {
        let width = table.width();
        let placeholders = vec!["?"; width].join(", ");
        let sql = format!(
            "INSERT OR IGNORE INTO {} VALUES ({placeholders})",
            table.name()
        );

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                ensure!(
                    row.len() == width,
                    "expected {} fields for {}, got {}",
                    width,
                    table.name(),
                    row.len()
                );
                let params: Vec<Value> = row
                    .iter()
                    .enumerate()
                    .map(|(index, field)| bind_field(table, index, field))
                    .collect();
                inserted += stmt.execute(params_from_iter(params))?;
            }
        }
        tx.commit()
            .with_context(|| format!("committing append into {}", table.name()))?;

        debug!(table = table.name(), rows = rows.len(), inserted, "append complete");
        Ok(inserted)
    }

    /// Start a transaction; dropping it without commit rolls back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn.transaction().context("starting transaction")
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn bind_field(table: Table, index: usize, field: &str) -> Value {
    // the reserved normalization slot is numeric and arrives empty from routing
    if table == Table::Vehicles && index == vehicle_column("amount_damage_norm") && field.is_empty()
    {
        Value::Null
    } else {
        Value::Text(field.to_string())
    }
}
