use crate::error::ShapeError;

/// Field count of a correctly parsed vehicle record.
pub const CANONICAL_WIDTH: usize = 36;

/// Separator the extracts place between quoted fields. Short rows happen when
/// a stray quote inside a value makes the reader swallow the following fields
/// into one, leaving this sequence embedded in the merged field.
const QUOTE_DELIMITER: &str = "\",";

/// Restore a short row to the canonical width.
///
/// The merged fields still contain the `",` boundaries that the reader failed
/// to split on, so re-joining the record on that sequence and re-splitting
/// recovers exactly the original fields. Splitting on the plain comma instead
/// would also break values that legitimately contain one.
///
/// A record already at the canonical width is returned unchanged. Anything
/// that does not come out at exactly 36 fields is unrepairable and reported
/// with both lengths; the caller decides its disposition.
pub fn repair_short_row(fields: &[String]) -> Result<Vec<String>, ShapeError> {
    if fields.len() == CANONICAL_WIDTH {
        return Ok(fields.to_vec());
    }

    let joined = fields.join(QUOTE_DELIMITER);
    let repaired: Vec<String> = joined
        .split(QUOTE_DELIMITER)
        .map(str::to_string)
        .collect();

    if repaired.len() != CANONICAL_WIDTH {
        return Err(ShapeError {
            original_len: fields.len(),
            repaired_len: repaired.len(),
        });
    }
    Ok(repaired)
}
