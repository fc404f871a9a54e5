//! Registry of resolved artifacts, deduplicated by coordinate.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::coordinate::Coordinate;
use crate::index::AnnotationIndex;
use crate::indexer::ArtifactIndexer;

/// A resolved artifact and its lazily built annotation index.
///
/// Equality is by coordinate; the base location and index never take part.
#[derive(Debug)]
pub struct ResolvedDependency {
    coordinate: Coordinate,
    base: PathBuf,
    index: OnceLock<Arc<AnnotationIndex>>,
}

impl ResolvedDependency {
    pub fn new(coordinate: Coordinate, base: impl Into<PathBuf>) -> Self {
        Self {
            coordinate,
            base: base.into(),
            index: OnceLock::new(),
        }
    }

    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    /// Builds the index on first use; later calls return the same instance.
    pub fn index(&self, indexer: &ArtifactIndexer) -> Arc<AnnotationIndex> {
        Arc::clone(self.index.get_or_init(|| {
            Arc::new(indexer.index(&self.coordinate.gav(), &self.base))
        }))
    }

    pub fn indexed(&self) -> Option<&Arc<AnnotationIndex>> {
        self.index.get()
    }
}

impl PartialEq for ResolvedDependency {
    fn eq(&self, other: &Self) -> bool {
        self.coordinate == other.coordinate
    }
}

impl Eq for ResolvedDependency {}

impl std::hash::Hash for ResolvedDependency {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.coordinate.hash(state);
    }
}

#[derive(Debug, Default)]
pub struct DependencyRegistry {
    by_gav: HashMap<String, Arc<ResolvedDependency>>,
    order: Vec<String>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `coordinate`, calling `supplier` only if it is absent.
    pub fn locate<F>(&mut self, coordinate: &Coordinate, supplier: F) -> Arc<ResolvedDependency>
    where
        F: FnOnce() -> ResolvedDependency,
    {
        let key = coordinate.gav();
        match self.by_gav.entry(key) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let dependency = supplier();
                debug_assert_eq!(dependency.coordinate(), coordinate);
                self.order.push(e.key().clone());
                tracing::trace!(coordinate = %coordinate, "Registered dependency");
                Arc::clone(e.insert(Arc::new(dependency)))
            }
        }
    }

    pub fn get(&self, coordinate: &Coordinate) -> Option<Arc<ResolvedDependency>> {
        self.get_gav(&coordinate.gav())
    }

    pub fn get_gav(&self, gav: &str) -> Option<Arc<ResolvedDependency>> {
        self.by_gav.get(gav).cloned()
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.by_gav.contains_key(&coordinate.gav())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResolvedDependency>> {
        self.order.iter().filter_map(|k| self.by_gav.get(k))
    }
}
