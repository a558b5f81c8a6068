//! In-memory view of one flow's milestone forest.
//!
//! Milestones are stored as a parent-indexed list. The route a project
//! follows is the depth-first pre-order of that forest: a parent comes
//! before its children, and siblings are ordered by `index` (ties broken by
//! id). A project only ever moves one step forward along this route.

use std::collections::{HashMap, HashSet};

use crate::errors::AdminError;
use crate::models::{Milestone, MilestoneNode};

#[derive(Debug, Clone)]
pub struct MilestoneTree {
    flow_id: i64,
    by_id: HashMap<i64, Milestone>,
    children: HashMap<Option<i64>, Vec<i64>>,
    order: Vec<i64>,
}

impl MilestoneTree {
    /// Build the tree, rejecting foreign milestones, dangling parents and
    /// cycles.
    pub fn build(flow_id: i64, milestones: Vec<Milestone>) -> Result<Self, AdminError> {
        let mut by_id = HashMap::with_capacity(milestones.len());
        for m in milestones {
            if m.flow_id != flow_id {
                return Err(AdminError::validation(format!(
                    "Milestone {} belongs to flow {}, not {}",
                    m.id, m.flow_id, flow_id
                )));
            }
            by_id.insert(m.id, m);
        }

        let mut children: HashMap<Option<i64>, Vec<i64>> = HashMap::new();
        for m in by_id.values() {
            if let Some(parent) = m.parent_id {
                if !by_id.contains_key(&parent) {
                    return Err(AdminError::validation(format!(
                        "Milestone {} references missing parent {}",
                        m.id, parent
                    )));
                }
            }
            children.entry(m.parent_id).or_default().push(m.id);
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|id| (by_id[id].index, *id));
        }

        let mut order = Vec::with_capacity(by_id.len());
        let mut visited = HashSet::with_capacity(by_id.len());
        let mut stack: Vec<i64> = children
            .get(&None)
            .map(|roots| roots.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(kids) = children.get(&Some(id)) {
                stack.extend(kids.iter().rev().copied());
            }
        }

        // Anything unreachable from a root sits on a parent cycle.
        if order.len() != by_id.len() {
            let mut stuck: Vec<i64> = by_id
                .keys()
                .filter(|id| !visited.contains(id))
                .copied()
                .collect();
            stuck.sort_unstable();
            return Err(AdminError::validation(format!(
                "Milestones {:?} form a parent cycle",
                stuck
            )));
        }

        Ok(Self {
            flow_id,
            by_id,
            children,
            order,
        })
    }

    pub fn flow_id(&self) -> i64 {
        self.flow_id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Milestone> {
        self.by_id.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Milestones in route order.
    pub fn ordered(&self) -> impl Iterator<Item = &Milestone> {
        self.order.iter().map(|id| &self.by_id[id])
    }

    pub fn first(&self) -> Option<&Milestone> {
        self.order.first().map(|id| &self.by_id[id])
    }

    pub fn last(&self) -> Option<&Milestone> {
        self.order.last().map(|id| &self.by_id[id])
    }

    pub fn position(&self, id: i64) -> Option<usize> {
        self.order.iter().position(|m| *m == id)
    }

    /// The milestone after `id` on the route, if any.
    pub fn successor(&self, id: i64) -> Option<&Milestone> {
        let pos = self.position(id)?;
        self.order.get(pos + 1).map(|next| &self.by_id[next])
    }

    pub fn is_last(&self, id: i64) -> bool {
        self.order.last() == Some(&id)
    }

    /// Parents of `id`, nearest first.
    pub fn ancestors(&self, id: i64) -> Vec<&Milestone> {
        let mut chain = Vec::new();
        let mut cursor = self.by_id.get(&id).and_then(|m| m.parent_id);
        while let Some(parent) = cursor {
            match self.by_id.get(&parent) {
                Some(m) => {
                    chain.push(m);
                    cursor = m.parent_id;
                }
                None => break,
            }
        }
        chain
    }

    /// Nested view of the forest with siblings in route order.
    pub fn nodes(&self) -> Vec<MilestoneNode> {
        self.nodes_under(None)
    }

    fn nodes_under(&self, parent: Option<i64>) -> Vec<MilestoneNode> {
        self.children
            .get(&parent)
            .map(|ids| {
                ids.iter()
                    .map(|id| MilestoneNode {
                        milestone: self.by_id[id].clone(),
                        children: self.nodes_under(Some(*id)),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
