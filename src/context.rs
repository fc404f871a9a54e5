//! Build-scoped state shared by discovery and classification.

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::composite::CompositeIndex;
use crate::coordinate::Coordinate;
use crate::dependency::{DependencyRegistry, ResolvedDependency};
use crate::extension::{ExtensionMarker, ExtensionRegistry};
use crate::indexer::ArtifactIndexer;
use crate::resolver::ResolvedArtifact;

/// Build-wide runtime dependencies in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSet {
    order: Vec<Coordinate>,
    seen: HashSet<Coordinate>,
}

impl RuntimeSet {
    pub fn insert(&mut self, coordinate: &Coordinate) -> bool {
        if !self.seen.insert(coordinate.clone()) {
            return false;
        }
        self.order.push(coordinate.clone());
        true
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.seen.contains(coordinate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coordinate> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct BuildContext {
    pub dependencies: DependencyRegistry,
    pub extensions: ExtensionRegistry,
    pub composite: CompositeIndex,
    pub runtime: RuntimeSet,
    indexer: ArtifactIndexer,
    parallel_indexing: bool,
    markers: HashMap<Coordinate, Option<ExtensionMarker>>,
    probes: usize,
}

impl BuildContext {
    pub fn new(indexer: ArtifactIndexer) -> Self {
        Self {
            dependencies: DependencyRegistry::new(),
            extensions: ExtensionRegistry::new(),
            composite: CompositeIndex::new(),
            runtime: RuntimeSet::default(),
            indexer,
            parallel_indexing: true,
            markers: HashMap::new(),
            probes: 0,
        }
    }

    pub fn with_parallel_indexing(mut self, enabled: bool) -> Self {
        self.parallel_indexing = enabled;
        self
    }

    pub fn indexer(&self) -> &ArtifactIndexer {
        &self.indexer
    }

    /// Registers every artifact without building any index.
    pub fn locate_all(&mut self, artifacts: &[ResolvedArtifact]) -> Vec<Arc<ResolvedDependency>> {
        artifacts
            .iter()
            .map(|a| {
                self.dependencies.locate(&a.coordinate, || {
                    ResolvedDependency::new(a.coordinate.clone(), a.path.clone())
                })
            })
            .collect()
    }

    /// Registers, indexes and merges every artifact into the composite.
    ///
    /// Indexes not built yet may be computed in parallel; the registries and
    /// the composite are only touched on this thread.
    pub fn register_artifacts(
        &mut self,
        artifacts: &[ResolvedArtifact],
    ) -> Vec<Arc<ResolvedDependency>> {
        let located = self.locate_all(artifacts);

        let pending: Vec<&Arc<ResolvedDependency>> =
            located.iter().filter(|d| !d.is_indexed()).collect();
        if self.parallel_indexing && pending.len() > 1 {
            let indexer = &self.indexer;
            pending.par_iter().for_each(|d| {
                d.index(indexer);
            });
        }

        for dependency in &located {
            let index = dependency.index(&self.indexer);
            self.composite.expand(&dependency.coordinate().gav(), index);
        }
        located
    }

    /// Marker of `artifact`, read at most once per coordinate. An artifact
    /// that cannot be opened has no marker.
    pub fn probe_marker(&mut self, artifact: &ResolvedArtifact) -> Option<ExtensionMarker> {
        if let Some(memo) = self.markers.get(&artifact.coordinate) {
            return memo.clone();
        }
        self.probes += 1;
        let marker = read_marker(&self.indexer, artifact);
        self.markers
            .insert(artifact.coordinate.clone(), marker.clone());
        marker
    }

    /// Marker probes performed so far.
    pub fn probe_count(&self) -> usize {
        self.probes
    }
}

fn read_marker(indexer: &ArtifactIndexer, artifact: &ResolvedArtifact) -> Option<ExtensionMarker> {
    let coordinate = &artifact.coordinate;
    let mut tree = match indexer.source().open(&artifact.path) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::debug!(%coordinate, error = %e, "Cannot open artifact for marker probe");
            return None;
        }
    };
    if !tree.has_path(crate::extension::MARKER_PATH) {
        return None;
    }
    match tree.read(crate::extension::MARKER_PATH) {
        Ok(Some(raw)) => Some(ExtensionMarker::parse(&String::from_utf8_lossy(&raw))),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(%coordinate, error = %e, "Unreadable extension marker");
            Some(ExtensionMarker::default())
        }
    }
}
