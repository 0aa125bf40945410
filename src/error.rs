use thiserror::Error;

/// A raw record whose field count could not be reconciled to the canonical
/// width by the repair heuristic. Collected per ingestion run and reported in
/// aggregate; never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row repair produced {repaired_len} fields from {original_len}")]
pub struct ShapeError {
    pub original_len: usize,
    pub repaired_len: usize,
}

/// A field that was expected to hold a number but did not parse as one.
/// Aborts the enclosing sanitization transaction: silently coercing the value
/// would corrupt the aggregates computed from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot cast {field} value {value:?}")]
pub struct CastError {
    pub field: &'static str,
    pub value: String,
}
