//! Declarative child diffing shared by the Application and Environment reconcilers.

use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

/// Writes needed to turn the existing children into the desired set.
#[derive(Debug, PartialEq)]
pub struct ChildPlan<'a, D, C> {
    /// Desired keys with no child yet
    pub create: Vec<D>,
    /// Children whose key is not desired, plus duplicates of a desired key
    pub delete: Vec<&'a C>,
    /// One child per desired key that already exists
    pub keep: Vec<&'a C>,
}

/// Diffs `existing` children against the `desired` keys.
///
/// The first child seen for a key is kept; any later child with the same key
/// is scheduled for deletion.
pub fn plan_children<'a, D, C, F>(desired: &BTreeSet<D>, existing: &'a [C], key_of: F) -> ChildPlan<'a, D, C>
where
    D: Ord + Hash + Clone,
    F: Fn(&C) -> D,
{
    let mut seen = HashSet::new();
    let mut delete = Vec::new();
    let mut keep = Vec::new();
    for child in existing {
        let key = key_of(child);
        if desired.contains(&key) && seen.insert(key) {
            keep.push(child);
        } else {
            delete.push(child);
        }
    }
    let create = desired.iter().filter(|k| !seen.contains(*k)).cloned().collect();
    ChildPlan { create, delete, keep }
}
