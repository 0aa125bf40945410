// src/ingest/mod.rs
pub mod dedup;
pub mod repair;
pub mod route;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use dedup::dedup_by_key;
use route::{route_records, RoutedBatch};

/// Field indices of the composite primary key (country, vehicle_id, licence).
pub const KEY_FIELDS: [usize; 3] = [0, 1, 2];

/// Both destination sets of one ingestion run, deduplicated and ready for the
/// loader.
#[derive(Debug)]
pub struct IngestBatch {
    pub vehicles: Vec<Vec<String>>,
    pub overflow: Vec<Vec<String>>,
}

/// Trim whitespace + strip outer quotes if present. Some extract writers put
/// a space after the delimiter, which keeps the reader from recognizing the
/// quotes; this cleans up whatever survives.
fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Read one extract file into raw records.
///
/// The extracts are quoted, comma-delimited, one logical record per line,
/// with a header line that is skipped. Rows of any width are accepted here;
/// shape reconciliation happens in routing. The three key fields are
/// upper-cased on read, every other field keeps its original case.
pub fn read_extract(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening extract {}", path.display()))?;

    let mut records = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result
            .with_context(|| format!("CSV parse error in {} at record {}", path.display(), idx))?;
        if idx == 0 {
            // header line
            continue;
        }
        let mut fields: Vec<String> = record.iter().map(clean_str).collect();
        for field in fields.iter_mut().take(KEY_FIELDS.len()) {
            *field = field.to_uppercase();
        }
        records.push(fields);
    }
    Ok(records)
}

/// Repair, route and deduplicate every extract file into one loadable batch.
///
/// Files repair and route independently, so that part fans out across a
/// thread pool; the per-file outputs are then concatenated in sorted file
/// order before deduplication, keeping first-occurrence-wins deterministic
/// no matter how the files were scheduled.
#[instrument(level = "info", skip(paths), fields(files = paths.len()))]
pub fn ingest_extracts(paths: &[PathBuf]) -> Result<IngestBatch> {
    let mut sorted: Vec<PathBuf> = paths.to_vec();
    sorted.sort();

    let routed: Vec<Result<RoutedBatch>> = sorted
        .par_iter()
        .map(|path| Ok(route_records(read_extract(path)?)))
        .collect();

    let mut vehicles = Vec::new();
    let mut overflow = Vec::new();
    let mut shape_errors = Vec::new();
    for result in routed {
        let batch = result?;
        vehicles.extend(batch.vehicles);
        overflow.extend(batch.overflow);
        shape_errors.extend(batch.shape_errors);
    }

    if !shape_errors.is_empty() {
        warn!(
            dropped = shape_errors.len(),
            sample = %shape_errors[0],
            "unrepairable short rows dropped from ingestion"
        );
    }

    let (vehicles, report) = dedup_by_key(vehicles, &KEY_FIELDS);
    info!(
        total = report.total,
        unique = report.unique,
        dropped = report.dropped,
        "vehicle batch deduplicated"
    );
    let (overflow, report) = dedup_by_key(overflow, &KEY_FIELDS);
    info!(
        total = report.total,
        unique = report.unique,
        dropped = report.dropped,
        "overflow batch deduplicated"
    );

    Ok(IngestBatch { vehicles, overflow })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_extract(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn header_line_is_skipped() {
        let file = write_extract("country,vehicle_id,licence\n\"nl\",\"123\",\"ab-01-c\"\n");
        let records = read_extract(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][0], "NL");
    }

    #[test]
    fn key_fields_are_upper_cased_rest_untouched() {
        let file = write_extract("h1,h2,h3,h4\n\"nl\",\"ab12\",\"xy-9\",\"should stay lower\"\n");
        let records = read_extract(file.path()).unwrap();
        assert_eq!(records[0][0], "NL");
        assert_eq!(records[0][1], "AB12");
        assert_eq!(records[0][2], "XY-9");
        assert_eq!(records[0][3], "should stay lower");
    }

    #[test]
    fn space_padded_quoted_fields_are_cleaned() {
        let file = write_extract("h1,h2,h3,h4\n\"nl\", \"ab12\", \"xy-9\", \"plain\"\n");
        let records = read_extract(file.path()).unwrap();
        assert_eq!(records[0][0], "NL");
        assert_eq!(records[0][1], "AB12");
        assert_eq!(records[0][3], "plain");
    }

    #[test]
    fn rows_of_any_width_are_read() {
        let file = write_extract("h\n\"a\",\"b\"\n\"a\",\"b\",\"c\",\"d\"\n");
        let records = read_extract(file.path()).unwrap();
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[1].len(), 4);
    }

    #[test]
    fn files_merge_in_sorted_order_before_dedup() {
        fn full_row(marker: &str) -> String {
            let mut fields = vec!["\"nl\"".to_string(), "\"1\"".to_string(), "\"x\"".to_string()];
            fields.extend((3..36).map(|i| format!("\"{marker}{i}\"")));
            fields.join(",")
        }

        let dir = tempfile::tempdir().unwrap();
        // written out of order on purpose; ingestion must still prefer a.csv
        let b_path = dir.path().join("b.csv");
        std::fs::write(&b_path, format!("h\n{}\n", full_row("second"))).unwrap();
        let a_path = dir.path().join("a.csv");
        std::fs::write(&a_path, format!("h\n{}\n", full_row("first"))).unwrap();

        let batch = ingest_extracts(&[b_path, a_path]).unwrap();
        assert_eq!(batch.vehicles.len(), 1);
        assert_eq!(batch.vehicles[0][3], "first3");
    }
}
