use crate::dataset::{normalize_key, NdviRecord};
use crate::query_extractor::FilterTriple;

/// Exact-match lookup of a triple. First match wins; the dataset guarantees
/// at most one record per key.
pub fn find<'a>(triple: &FilterTriple, records: &'a [NdviRecord]) -> Option<&'a NdviRecord> {
    let state = normalize_key(&triple.state);
    let month = normalize_key(&triple.month);

    records.iter().find(|record| {
        normalize_key(&record.state) == state
            && normalize_key(&record.month) == month
            && record.year == triple.year
    })
}
