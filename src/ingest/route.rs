use crate::error::ShapeError;

use super::repair::{repair_short_row, CANONICAL_WIDTH};

/// Overflow rows are clamped to this width. A row wider than the canonical 36
/// gives no hint which delimiter was spurious, so everything is captured as-is
/// at a fixed width for later inspection instead of guessing.
pub const OVERFLOW_WIDTH: usize = 40;

/// Canonical width plus the reserved slot for the normalized damage amount,
/// appended at load time and filled by the sanitization pipeline.
pub const VEHICLE_WIDTH: usize = CANONICAL_WIDTH + 1;

/// Outcome of routing one batch of raw records.
#[derive(Debug, Default)]
pub struct RoutedBatch {
    /// Repaired records at the 37-field vehicle shape, input order preserved.
    pub vehicles: Vec<Vec<String>>,
    /// Over-wide records clamped to 40 fields, input order preserved.
    pub overflow: Vec<Vec<String>>,
    /// Short rows the repair heuristic could not narrow; dropped from the
    /// batch and surfaced for the aggregate report.
    pub shape_errors: Vec<ShapeError>,
}

/// Partition a batch of raw records into overflow and vehicle sets.
///
/// Order-preserving and disjoint: every input record lands in exactly one of
/// the two sets, or is dropped with a recorded [`ShapeError`].
pub fn route_records(records: Vec<Vec<String>>) -> RoutedBatch {
    let mut routed = RoutedBatch::default();

    for record in records {
        if record.len() > CANONICAL_WIDTH {
            routed.overflow.push(clamp_to_overflow_width(record));
        } else if record.len() == CANONICAL_WIDTH {
            routed.vehicles.push(with_reserved_slot(record));
        } else {
            match repair_short_row(&record) {
                Ok(repaired) => routed.vehicles.push(with_reserved_slot(repaired)),
                Err(err) => routed.shape_errors.push(err),
            }
        }
    }
    routed
}

fn with_reserved_slot(mut fields: Vec<String>) -> Vec<String> {
    fields.push(String::new());
    fields
}

fn clamp_to_overflow_width(mut fields: Vec<String>) -> Vec<String> {
    fields.truncate(OVERFLOW_WIDTH);
    fields.resize(OVERFLOW_WIDTH, String::new());
    fields
}
