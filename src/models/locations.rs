//! Location hierarchy.
//!
//! A tree of geographic units. Predict and fit both name one node as the
//! parent; rows are in scope when their location lies in that node's subtree.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::LocationId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("Location hierarchy is empty.")]
    Empty,
    #[error("Location hierarchy must have exactly one root, found {0:?}.")]
    RootCount(Vec<LocationId>),
    #[error("Location id {0} appears more than once.")]
    DuplicateId(LocationId),
    #[error("Location {child} names parent {parent}, which is not in the hierarchy.")]
    UnknownParent { child: LocationId, parent: LocationId },
    #[error("Location {0} is part of a cycle.")]
    Cycle(LocationId),
    #[error("Location {0} is not in the hierarchy.")]
    UnknownLocation(LocationId),
}

/// One node of the hierarchy as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub name: String,
    pub location_id: LocationId,
    pub parent_id: Option<LocationId>,
}

impl LocationRecord {
    pub fn new(name: impl Into<String>, location_id: LocationId, parent_id: Option<LocationId>) -> Self {
        Self {
            name: name.into(),
            location_id,
            parent_id,
        }
    }
}

/// Validated location tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LocationRecord>", into = "Vec<LocationRecord>")]
pub struct LocationHierarchy {
    records: Vec<LocationRecord>,
    root: LocationId,
    children: BTreeMap<LocationId, Vec<LocationId>>,
}

impl LocationHierarchy {
    pub fn new(records: Vec<LocationRecord>) -> Result<Self, HierarchyError> {
        if records.is_empty() {
            return Err(HierarchyError::Empty);
        }

        let mut ids = BTreeSet::new();
        for r in &records {
            if !ids.insert(r.location_id) {
                return Err(HierarchyError::DuplicateId(r.location_id));
            }
        }

        let roots: Vec<LocationId> = records
            .iter()
            .filter(|r| r.parent_id.is_none())
            .map(|r| r.location_id)
            .collect();
        if roots.len() != 1 {
            return Err(HierarchyError::RootCount(roots));
        }
        let root = roots[0];

        let mut children: BTreeMap<LocationId, Vec<LocationId>> = BTreeMap::new();
        for r in &records {
            if let Some(parent) = r.parent_id {
                if !ids.contains(&parent) {
                    return Err(HierarchyError::UnknownParent {
                        child: r.location_id,
                        parent,
                    });
                }
                children.entry(parent).or_default().push(r.location_id);
            }
        }

        let hierarchy = Self {
            records,
            root,
            children,
        };

        // Every node must be reachable from the root; anything else hangs off a cycle.
        let reachable = hierarchy.subtree(root)?;
        if let Some(r) = hierarchy
            .records
            .iter()
            .find(|r| !reachable.contains(&r.location_id))
        {
            return Err(HierarchyError::Cycle(r.location_id));
        }

        Ok(hierarchy)
    }

    /// A hierarchy with a single node.
    pub fn single(name: impl Into<String>, location_id: LocationId) -> Self {
        Self {
            records: vec![LocationRecord::new(name, location_id, None)],
            root: location_id,
            children: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> LocationId {
        self.root
    }

    pub fn records(&self) -> &[LocationRecord] {
        &self.records
    }

    pub fn contains(&self, location: LocationId) -> bool {
        self.records.iter().any(|r| r.location_id == location)
    }

    pub fn name(&self, location: LocationId) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.location_id == location)
            .map(|r| r.name.as_str())
    }

    /// Direct children of `location`, in input order.
    pub fn children(&self, location: LocationId) -> &[LocationId] {
        self.children
            .get(&location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `parent` and all of its descendants.
    pub fn subtree(&self, parent: LocationId) -> Result<BTreeSet<LocationId>, HierarchyError> {
        if !self.contains(parent) {
            return Err(HierarchyError::UnknownLocation(parent));
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![parent];
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.children(node).iter().copied());
            }
        }
        Ok(seen)
    }
}

impl TryFrom<Vec<LocationRecord>> for LocationHierarchy {
    type Error = HierarchyError;

    fn try_from(records: Vec<LocationRecord>) -> Result<Self, Self::Error> {
        Self::new(records)
    }
}

impl From<LocationHierarchy> for Vec<LocationRecord> {
    fn from(h: LocationHierarchy) -> Self {
        h.records
    }
}
