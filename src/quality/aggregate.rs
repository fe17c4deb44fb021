use crate::quality::rules::SpillId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The canonical set of spills failing at least one quality rule.
///
/// Built in one piece by [`aggregate`] or loaded from the cache; never
/// patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BadSpillSet(BTreeSet<SpillId>);

impl BadSpillSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, spill: SpillId) -> bool {
        self.0.contains(&spill)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = SpillId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_set(&self) -> &BTreeSet<SpillId> {
        &self.0
    }

    pub fn into_inner(self) -> BTreeSet<SpillId> {
        self.0
    }

    /// Keep only the items whose spill is not bad.
    pub fn retain_good<T>(&self, items: Vec<T>, spill_of: impl Fn(&T) -> SpillId) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| !self.contains(spill_of(item)))
            .collect()
    }
}

impl From<BTreeSet<SpillId>> for BadSpillSet {
    fn from(set: BTreeSet<SpillId>) -> Self {
        Self(set)
    }
}

impl FromIterator<SpillId> for BadSpillSet {
    fn from_iter<I: IntoIterator<Item = SpillId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a BadSpillSet {
    type Item = &'a SpillId;
    type IntoIter = std::collections::btree_set::Iter<'a, SpillId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Union of every rule result. Order and batching of the inputs do not
/// affect the output.
pub fn aggregate<I, S>(rule_results: I) -> BadSpillSet
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = SpillId>,
{
    rule_results.into_iter().flatten().collect()
}
