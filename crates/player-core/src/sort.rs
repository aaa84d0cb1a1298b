//! Sort orders and directory grouping over playlist entries.
//!
//! Name comparison approximates locale collation: accents and case are
//! ignored at first, then accents decide, then lowercase sorts before
//! uppercase.  Remaining ties fall through to the full name, the path and
//! finally the id so that every comparator is a strict total order and a
//! descending sort is the exact reverse of an ascending one.

use player_proto::model::{MediaFile, SortCriterion, SortOrder};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Compare two strings the way a user expects names to be ordered.
pub fn collate(a: &str, b: &str) -> Ordering {
    let a_nfd: Vec<char> = a.nfd().collect();
    let b_nfd: Vec<char> = b.nfd().collect();

    let primary = |chars: &[char]| -> Vec<char> {
        chars
            .iter()
            .filter(|c| !is_combining_mark(**c))
            .flat_map(|c| c.to_lowercase())
            .collect()
    };
    let secondary = |chars: &[char]| -> Vec<char> {
        chars.iter().flat_map(|c| c.to_lowercase()).collect()
    };
    // false (lowercase) sorts before true (uppercase)
    let tertiary = |chars: &[char]| -> Vec<bool> { chars.iter().map(|c| c.is_uppercase()).collect() };

    primary(&a_nfd)
        .cmp(&primary(&b_nfd))
        .then_with(|| secondary(&a_nfd).cmp(&secondary(&b_nfd)))
        .then_with(|| tertiary(&a_nfd).cmp(&tertiary(&b_nfd)))
        .then_with(|| a.cmp(b))
}

/// Name order with each side's extension stripped.
pub fn compare_by_name(a: &MediaFile, b: &MediaFile) -> Ordering {
    collate(a.stem(), b.stem())
        .then_with(|| collate(&a.name, &b.name))
        .then_with(|| a.full_path.cmp(&b.full_path))
        .then_with(|| a.id.cmp(&b.id))
}

/// Modification time, ties broken by name ascending.
pub fn compare_by_date(a: &MediaFile, b: &MediaFile) -> Ordering {
    a.date.cmp(&b.date).then_with(|| compare_by_name(a, b))
}

/// Stable in-place sort.
pub fn sort(files: &mut [MediaFile], order: SortOrder) {
    if files.is_empty() {
        return;
    }

    match order {
        SortOrder::NameAsc => files.sort_by(compare_by_name),
        SortOrder::NameDesc => files.sort_by(|a, b| compare_by_name(b, a)),
        SortOrder::DateAsc => files.sort_by(compare_by_date),
        SortOrder::DateDesc => {
            files.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| compare_by_name(a, b)))
        }
    }
}

/// Partition by directory in first-seen order, sort each partition and
/// concatenate.
pub fn group_and_sort(files: &mut Vec<MediaFile>, order: SortOrder) {
    if files.is_empty() {
        return;
    }

    let mut slots: HashMap<PathBuf, usize> = HashMap::new();
    let mut groups: Vec<Vec<MediaFile>> = Vec::new();
    for file in files.drain(..) {
        let slot = *slots.entry(file.dir.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(file);
    }

    for mut group in groups {
        sort(&mut group, order);
        files.extend(group);
    }
}

/// Apply a full sort criterion.
pub fn arrange(files: &mut Vec<MediaFile>, criterion: SortCriterion) {
    if criterion.group_by {
        group_and_sort(files, criterion.order);
    } else {
        sort(files, criterion.order);
    }
}
