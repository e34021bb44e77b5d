//! Per-entry digest records and aggregate ordering.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Digest record for one completed archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySum {
    /// Cleaned entry name: one leading `./` and one trailing `/` stripped
    pub name: String,
    /// Lowercase hex SHA-256 over canonicalized header fields plus body
    pub sum: String,
    /// Zero-based position of the entry in the archive stream
    pub pos: u64,
}

/// Order entries for aggregation: ascending by per-entry digest, except that
/// entries sharing a name (archive overwrite semantics) keep their archive
/// order among themselves, so repeated writes to one path always combine in
/// the order they occurred.
pub(crate) fn aggregate_order(sums: &[EntrySum]) -> Vec<&EntrySum> {
    let mut ordered: Vec<&EntrySum> = sums.iter().collect();
    ordered.sort_by(|a, b| a.sum.cmp(&b.sum).then_with(|| a.pos.cmp(&b.pos)));

    let mut slots_by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (slot, entry) in ordered.iter().enumerate() {
        slots_by_name.entry(&entry.name).or_default().push(slot);
    }
    for slots in slots_by_name.values().filter(|s| s.len() > 1) {
        let mut group: Vec<&EntrySum> = slots.iter().map(|&i| ordered[i]).collect();
        group.sort_by_key(|entry| entry.pos);
        for (&slot, entry) in slots.iter().zip(group) {
            ordered[slot] = entry;
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, sum: &str, pos: u64) -> EntrySum {
        EntrySum {
            name: name.to_owned(),
            sum: sum.to_owned(),
            pos,
        }
    }

    #[test]
    fn test_unique_names_sort_by_sum() {
        let sums = vec![entry("b", "ff", 0), entry("a", "00", 1), entry("c", "7a", 2)];
        let ordered: Vec<&str> = aggregate_order(&sums).iter().map(|e| e.sum.as_str()).collect();
        assert_eq!(ordered, ["00", "7a", "ff"]);
    }

    #[test]
    fn test_duplicate_names_keep_archive_order() {
        // The overwrite wrote a smaller sum second; position must win.
        let sums = vec![entry("same", "ff", 0), entry("same", "00", 1)];
        let ordered: Vec<u64> = aggregate_order(&sums).iter().map(|e| e.pos).collect();
        assert_eq!(ordered, [0, 1]);
    }

    #[test]
    fn test_duplicates_and_uniques_mixed() {
        let sums = vec![
            entry("dup", "cc", 0),
            entry("only", "aa", 1),
            entry("dup", "bb", 2),
        ];
        let ordered: Vec<(&str, u64)> = aggregate_order(&sums)
            .iter()
            .map(|e| (e.name.as_str(), e.pos))
            .collect();
        // "only" sorts purely by sum; the "dup" pair fills the remaining
        // slots in archive order.
        assert_eq!(ordered, [("only", 1), ("dup", 0), ("dup", 2)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_order(&[]).is_empty());
    }
}
