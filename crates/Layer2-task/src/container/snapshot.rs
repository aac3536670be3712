//! Container snapshots for leak detection

use r2r_foundation::env_detect::PARENT_LABEL;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Shortest id prefix accepted as a parent reference (docker's short id)
const SHORT_ID_LEN: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Containers known to the daemon at one point in time, by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub containers: BTreeMap<String, ContainerInfo>,
}

impl ContainerSnapshot {
    pub fn insert(&mut self, id: impl Into<String>, info: ContainerInfo) {
        self.containers.insert(id.into(), info);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.containers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Containers labelled as children of `parent_id`
    ///
    /// A nested r2r only knows its own hostname, which is the short id, so
    /// label values that are a prefix of `parent_id` match too.
    pub fn children_of(&self, parent_id: &str) -> Vec<String> {
        self.containers
            .iter()
            .filter(|(_, info)| {
                info.labels
                    .get(PARENT_LABEL)
                    .map(|p| is_same_container(p, parent_id))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Containers present now but not in `before`, minus `allowed`
    pub fn leaked_since(
        &self,
        before: &ContainerSnapshot,
        allowed: &HashSet<String>,
    ) -> Vec<(String, String)> {
        self.containers
            .iter()
            .filter(|(id, _)| !before.contains(id) && !allowed.contains(*id))
            .map(|(id, info)| (id.clone(), info.name.clone()))
            .collect()
    }
}

fn is_same_container(reference: &str, full_id: &str) -> bool {
    reference == full_id || (reference.len() >= SHORT_ID_LEN && full_id.starts_with(reference))
}
