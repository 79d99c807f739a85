use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{ClipId, Color, GroupId};

/// Clips that select and move together. A clip's `group_id` is the only
/// back-reference; the timeline keeps both sides in step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipGroup {
    pub id: GroupId,
    pub color: Color,
    pub members: BTreeSet<ClipId>,
}

impl ClipGroup {
    pub fn new(id: GroupId, color: Color) -> Self {
        Self {
            id,
            color,
            members: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, clip: ClipId) -> bool {
        self.members.insert(clip)
    }

    pub fn remove(&mut self, clip: ClipId) -> bool {
        self.members.remove(&clip)
    }

    pub fn contains(&self, clip: ClipId) -> bool {
        self.members.contains(&clip)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_a_set() {
        let mut group = ClipGroup::new(GroupId(1), Color::for_group(GroupId(1)));
        assert!(group.insert(ClipId(5)));
        assert!(!group.insert(ClipId(5)));
        assert!(group.insert(ClipId(2)));
        assert_eq!(group.members.iter().copied().collect::<Vec<_>>(), vec![ClipId(2), ClipId(5)]);
        assert!(group.remove(ClipId(5)));
        assert!(!group.contains(ClipId(5)));
        assert!(group.remove(ClipId(2)));
        assert!(group.is_empty());
    }
}
