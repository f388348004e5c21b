use tracing::debug;

use super::detect::LapRange;

/// Merge runs of `merge_size` consecutive laps, starting at the 1-based ordinal
/// `merge_from`.
///
/// Laps before `merge_from` and any trailing partial group are passed through as-is.
/// Combinations that leave nothing to merge return the input unchanged.
pub fn aggregate_laps(laps: &[LapRange], merge_from: usize, merge_size: usize) -> Vec<LapRange> {
    let merge_from = merge_from.max(1);
    if merge_size <= 1 || laps.len() <= merge_from {
        return laps.to_vec();
    }

    let head = merge_from - 1;
    let groups = (laps.len() - head) / merge_size;
    let grouped_end = head + groups * merge_size;
    debug!(
        laps = laps.len(),
        merge_from, merge_size, groups, "aggregating laps"
    );

    let mut out = Vec::with_capacity(head + groups + (laps.len() - grouped_end));
    out.extend_from_slice(&laps[..head]);
    for group in laps[head..grouped_end].chunks_exact(merge_size) {
        let first = &group[0];
        let last = &group[group.len() - 1];
        out.push(LapRange::new(
            format!("{}-{}", first.label, last.label),
            first.start_index,
            last.end_index,
        ));
    }
    out.extend_from_slice(&laps[grouped_end..]);
    out
}
