use std::collections::BTreeMap;

use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors when building or walking a `SkillTree`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkillError {
    /// The skill, or the parent it was added below, is not in the tree
    #[error("skill {0} does not exist")]
    UnknownSkill(U256),
    /// Skill ids are unique
    #[error("skill {0} already exists")]
    DuplicateSkill(U256),
    /// Walking up from this skill came back to it
    #[error("the parent chain of skill {0} is cyclic")]
    Cycle(U256),
}

/// Skill hierarchy. Every skill has at most one parent and the parent must exist before the
/// skill is added, so the hierarchy is acyclic by construction.
///
/// Walks use explicit worklists, deep hierarchies do not grow the stack.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillTree {
    parents: BTreeMap<U256, Option<U256>>,
    children: BTreeMap<U256, Vec<U256>>,
}

impl SkillTree {
    /// Tree without skills
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a skill without parent
    pub fn add_root(&mut self, id: U256) -> Result<(), SkillError> {
        self.insert(id, None)
    }

    /// Add a skill below `parent`
    pub fn add_skill(&mut self, id: U256, parent: U256) -> Result<(), SkillError> {
        if !self.contains(&parent) {
            return Err(SkillError::UnknownSkill(parent));
        }

        self.insert(id, Some(parent))
    }

    fn insert(&mut self, id: U256, parent: Option<U256>) -> Result<(), SkillError> {
        if self.contains(&id) {
            return Err(SkillError::DuplicateSkill(id));
        }
        self.parents.insert(id, parent);
        self.children.insert(id, vec![]);
        if let Some(parent) = parent {
            self.children.entry(parent).or_default().push(id);
        }

        Ok(())
    }

    /// Whether `id` was added to the tree
    pub fn contains(&self, id: &U256) -> bool {
        self.parents.contains_key(id)
    }

    /// Number of skills
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Direct parent of a skill, `None` for roots
    pub fn parent(&self, id: &U256) -> Result<Option<U256>, SkillError> {
        self.parents
            .get(id)
            .copied()
            .ok_or(SkillError::UnknownSkill(*id))
    }

    /// Every ancestor of `id`, from its direct parent up to the root
    pub fn ancestors(&self, id: &U256) -> Result<Vec<U256>, SkillError> {
        let mut ancestors = vec![];
        let mut next = self.parent(id)?;
        while let Some(current) = next {
            if ancestors.len() >= self.parents.len() {
                return Err(SkillError::Cycle(*id));
            }
            ancestors.push(current);
            next = self.parent(&current)?;
        }

        Ok(ancestors)
    }

    /// Every descendant of `id` (children, grandchildren...) in ascending id order
    pub fn descendants(&self, id: &U256) -> Result<Vec<U256>, SkillError> {
        if !self.contains(id) {
            return Err(SkillError::UnknownSkill(*id));
        }
        let mut descendants = vec![];
        let mut worklist = vec![*id];
        while let Some(current) = worklist.pop() {
            for child in self.children.get(&current).into_iter().flatten() {
                if descendants.len() >= self.parents.len() {
                    return Err(SkillError::Cycle(*id));
                }
                descendants.push(*child);
                worklist.push(*child);
            }
        }
        descendants.sort();

        Ok(descendants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[u64]) -> Vec<U256> {
        ids.iter().map(|id| U256::from(*id)).collect()
    }

    //      1
    //     / \
    //    2   3
    //   / \
    //  5   4
    fn tree() -> SkillTree {
        let mut tree = SkillTree::new();
        tree.add_root(1.into()).unwrap();
        tree.add_skill(2.into(), 1.into()).unwrap();
        tree.add_skill(3.into(), 1.into()).unwrap();
        tree.add_skill(5.into(), 2.into()).unwrap();
        tree.add_skill(4.into(), 2.into()).unwrap();
        tree
    }

    #[test]
    fn ancestors_nearest_first() {
        let tree = tree();
        assert_eq!(tree.ancestors(&5.into()), Ok(ids(&[2, 1])));
        assert_eq!(tree.ancestors(&1.into()), Ok(ids(&[])));
        assert_eq!(
            tree.ancestors(&9.into()),
            Err(SkillError::UnknownSkill(9.into()))
        );
    }

    #[test]
    fn descendants_ascending() {
        let tree = tree();
        assert_eq!(
            tree.descendants(&1.into()),
            Ok(ids(&[2, 3, 4, 5]))
        );
        assert_eq!(tree.descendants(&2.into()), Ok(ids(&[4, 5])));
        assert_eq!(tree.descendants(&3.into()), Ok(ids(&[])));
    }

    #[test]
    fn building_errors() {
        let mut tree = tree();
        assert_eq!(
            tree.add_skill(6.into(), 8.into()),
            Err(SkillError::UnknownSkill(8.into()))
        );
        assert_eq!(
            tree.add_root(3.into()),
            Err(SkillError::DuplicateSkill(3.into()))
        );
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn deep_hierarchy() {
        let mut tree = SkillTree::new();
        tree.add_root(0.into()).unwrap();
        for i in 1..100_000u64 {
            tree.add_skill(i.into(), (i - 1).into()).unwrap();
        }
        assert_eq!(tree.ancestors(&99_999.into()).unwrap().len(), 99_999);
        assert_eq!(tree.descendants(&0.into()).unwrap().len(), 99_999);
    }
}
