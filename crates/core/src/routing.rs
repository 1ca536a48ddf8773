//! Webhook path → repository mapping resolution.

use std::sync::Arc;

use tracing::warn;

use crate::models::RepoMapping;

/// Strip exactly one trailing slash.
pub fn normalize_path(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

/// A mapping that was dropped because an earlier one claimed its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicatePath {
    pub path: String,
    /// Registration index of the mapping that keeps the path.
    pub kept: usize,
    /// Registration index of the dropped mapping.
    pub dropped: usize,
}

/// Ordered, immutable set of repository mappings.
///
/// Tables are always built whole and replaced whole; a published table is
/// never patched.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    mappings: Vec<Arc<RepoMapping>>,
}

impl RoutingTable {
    /// Build a table from mappings in registration order.
    ///
    /// When several mappings share a webhook path only the first is kept;
    /// every later one yields exactly one [`DuplicatePath`].
    pub fn build(mappings: Vec<RepoMapping>) -> (Self, Vec<DuplicatePath>) {
        let mut kept: Vec<(usize, Arc<RepoMapping>)> = Vec::with_capacity(mappings.len());
        let mut duplicates = Vec::new();

        for (idx, mut mapping) in mappings.into_iter().enumerate() {
            mapping.path = normalize_path(&mapping.path).to_string();
            if let Some((first, _)) = kept.iter().find(|(_, m)| m.path == mapping.path) {
                warn!(
                    path = %mapping.path,
                    kept = first,
                    dropped = idx,
                    "duplicate webhook path, only the first mapping is used"
                );
                duplicates.push(DuplicatePath {
                    path: mapping.path,
                    kept: *first,
                    dropped: idx,
                });
                continue;
            }
            kept.push((idx, Arc::new(mapping)));
        }

        let table = Self {
            mappings: kept.into_iter().map(|(_, m)| m).collect(),
        };
        (table, duplicates)
    }

    /// Find the mapping registered for a request path.
    pub fn resolve(&self, path: &str) -> Option<Arc<RepoMapping>> {
        let path = normalize_path(path);
        self.mappings.iter().find(|m| m.path == path).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RepoMapping>> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
