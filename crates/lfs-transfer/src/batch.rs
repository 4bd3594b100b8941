use std::sync::Arc;

use lfs_api::ObjectSpec;

use crate::transferable::Transferable;

/// Objects negotiated together in one call.
#[derive(Debug, Default)]
pub struct Batch {
    items: Vec<Arc<dyn Transferable>>,
    limit: usize,
}

impl Batch {
    pub fn new(limit: usize) -> Self {
        Self {
            items: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, item: Arc<dyn Transferable>) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.limit
    }

    /// Order by declared size, largest first, so long transfers start
    /// early.
    pub fn sort_largest_first(&mut self) {
        self.items.sort_by(|a, b| b.size().cmp(&a.size()));
    }

    pub fn specs(&self) -> Vec<ObjectSpec> {
        self.items
            .iter()
            .map(|t| ObjectSpec {
                oid: t.oid(),
                size: t.size(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Transferable>> {
        self.items.iter()
    }
}

impl IntoIterator for Batch {
    type Item = Arc<dyn Transferable>;
    type IntoIter = std::vec::IntoIter<Arc<dyn Transferable>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
