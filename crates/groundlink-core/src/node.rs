//! Node directory: the name ↔ id table every node agrees on.

use crate::config::NodeEntry;
use crate::wire::{NodeId, MAX_NODE_NAME_LEN};

#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    entries: Vec<(NodeId, String)>,
}

impl NodeDirectory {
    /// Build from config entries. Id 0, overlong names and repeated
    /// ids or names are skipped; the first occurrence wins.
    pub fn from_entries(entries: &[NodeEntry]) -> Self {
        let mut dir = Self::default();
        for e in entries {
            dir.insert(e.id, &e.name);
        }
        dir
    }

    /// Returns false if the entry was refused.
    pub fn insert(&mut self, id: NodeId, name: &str) -> bool {
        if id == 0
            || name.is_empty()
            || name.len() > MAX_NODE_NAME_LEN
            || self.lookup_name(id).is_some()
            || self.lookup_id(name).is_some()
        {
            return false;
        }
        self.entries.push((id, name.to_string()));
        true
    }

    pub fn lookup_id(&self, name: &str) -> Option<NodeId> {
        self.entries
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| *id)
    }

    pub fn lookup_name(&self, id: NodeId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, n)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.entries.iter().map(|(id, n)| (*id, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
