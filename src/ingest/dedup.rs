use std::collections::HashSet;

/// Counts reported by one deduplication pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupReport {
    pub total: usize,
    pub unique: usize,
    pub dropped: usize,
}

/// Remove duplicate-key records from a homogeneous batch, keeping the first
/// occurrence in iteration order.
///
/// Key fields are compared byte-for-byte; callers upper-case them at the read
/// boundary, this function never normalizes case itself.
pub fn dedup_by_key(
    records: Vec<Vec<String>>,
    key_fields: &[usize],
) -> (Vec<Vec<String>>, DedupReport) {
    let total = records.len();
    let mut seen: HashSet<Vec<String>> = HashSet::with_capacity(total);
    let mut unique = Vec::with_capacity(total);

    for record in records {
        let key: Vec<String> = key_fields
            .iter()
            .map(|&i| record.get(i).cloned().unwrap_or_default())
            .collect();
        if seen.insert(key) {
            unique.push(record);
        }
    }

    let report = DedupReport {
        total,
        unique: unique.len(),
        dropped: total - unique.len(),
    };
    (unique, report)
}
