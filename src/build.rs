//! A full resolution pass over a build description.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::ArtifactSource;
use crate::context::BuildContext;
use crate::coordinate::{Coordinate, QUARKUS_GROUP, QUARKUS_PREFIX};
use crate::discovery::{DiscoveryReport, discover};
use crate::extension::{Extension, ExtensionKind, ExtensionRequest, ExtensionSpec};
use crate::indexer::ArtifactIndexer;
use crate::orm::{HIBERNATE_ORM_NAME, HIBERNATE_ORM_SHORT_NAME, OrmConfig};
use crate::persistence::{PersistenceUnit, resolve_persistence_units};
use crate::resolver::{ArtifactEntry, DependencyResolver, ManifestResolver, ResolvedArtifact};
use crate::store::{IndexStore, NoIndexStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectArtifact {
    pub coordinate: Coordinate,
    /// Compiled classes directory (or jar) of the project itself.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(default)]
    pub quarkus_version: Option<String>,
    #[serde(default)]
    pub repository: Option<PathBuf>,
    #[serde(default)]
    pub extensions: Vec<ExtensionSpec>,
    #[serde(default)]
    pub project: Option<ProjectArtifact>,
    #[serde(default)]
    pub orm: Option<OrmConfig>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
}

impl BuildSpec {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse build description")
    }

    /// Reads a build description; the second value is the directory relative
    /// paths in it resolve against.
    pub fn load(path: &Path) -> Result<(Self, PathBuf)> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build description: {}", path.display()))?;
        let mut spec = Self::from_json(&raw)
            .with_context(|| format!("Invalid build description: {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if let Some(project) = &mut spec.project
            && project.path.is_relative()
        {
            project.path = base_dir.join(&project.path);
        }
        Ok((spec, base_dir))
    }

    /// `repository` from the description wins over `default_repository`.
    pub fn resolver(&self, base_dir: &Path, default_repository: &Path) -> ManifestResolver {
        let repository = match &self.repository {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => base_dir.join(p),
            None => default_repository.to_path_buf(),
        };
        ManifestResolver::from_entries(&self.artifacts, base_dir, &repository)
    }

    /// Declared extensions, plus `hibernateOrm` when ORM is configured and it
    /// is not declared already, by name, short name or artifact.
    pub fn extension_requests(&self) -> Result<Vec<ExtensionRequest>> {
        let mut specs = self.extensions.clone();
        if self.orm.is_some() && !specs.iter().any(declares_hibernate_orm) {
            specs.push(OrmConfig::extension_spec());
        }
        specs
            .into_iter()
            .map(|s| s.into_request(self.quarkus_version.as_deref()))
            .collect()
    }
}

fn declares_hibernate_orm(spec: &ExtensionSpec) -> bool {
    let orm_artifact = format!("{QUARKUS_PREFIX}-{HIBERNATE_ORM_SHORT_NAME}");
    spec.name == HIBERNATE_ORM_NAME
        || spec.quarkus.as_deref() == Some(HIBERNATE_ORM_SHORT_NAME)
        || spec
            .artifact
            .as_ref()
            .is_some_and(|n| n.group == QUARKUS_GROUP && n.artifact == orm_artifact)
}

/// How a pass builds and keeps its indexes.
#[derive(Clone)]
pub struct ResolveOptions {
    pub parallel_indexing: bool,
    pub store: Arc<dyn IndexStore>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            parallel_indexing: true,
            store: Arc::new(NoIndexStore),
        }
    }
}

impl ResolveOptions {
    pub fn context(&self, source: Arc<dyn ArtifactSource>) -> BuildContext {
        BuildContext::new(ArtifactIndexer::new(source, Arc::clone(&self.store)))
            .with_parallel_indexing(self.parallel_indexing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub probes: usize,
    pub declared: usize,
    pub implicit: usize,
    pub transitive: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub extensions: Vec<Extension>,
    pub persistence_units: Vec<PersistenceUnit>,
    pub runtime_dependencies: Vec<Coordinate>,
    pub discovery: DiscoveryStats,
    pub dependencies: usize,
    pub indexed_classes: usize,
}

/// Discovery only: declared extensions, the ORM JDBC extension, then the
/// project artifact.
pub fn discover_build(
    ctx: &mut BuildContext,
    spec: &BuildSpec,
    resolver: &dyn DependencyResolver,
) -> Result<DiscoveryReport> {
    if let Some(orm) = &spec.orm {
        orm.database_family()?;
    }

    let mut report = discover(ctx, resolver, spec.extension_requests()?)?;

    if let Some(orm) = &spec.orm
        && let Some(request) = orm.jdbc_extension(&ctx.extensions, spec.quarkus_version.as_deref())?
    {
        let jdbc = discover(ctx, resolver, [request])?;
        report.probes += jdbc.probes;
        report.registered.extend(jdbc.registered);
    }

    if let Some(project) = &spec.project {
        let artifact = ResolvedArtifact::new(project.coordinate.clone(), project.path.clone());
        ctx.register_artifacts(std::slice::from_ref(&artifact));
        ctx.runtime.insert(&artifact.coordinate);
        tracing::debug!(coordinate = %artifact.coordinate, "Registered project artifact");
    }

    Ok(report)
}

pub fn resolve_build(
    ctx: &mut BuildContext,
    spec: &BuildSpec,
    resolver: &dyn DependencyResolver,
) -> Result<BuildOutcome> {
    discover_build(ctx, spec, resolver)?;

    let persistence_units = match &spec.orm {
        Some(orm) => resolve_persistence_units(ctx, &orm.persistence_units)?,
        None => Vec::new(),
    };
    Ok(outcome(ctx, persistence_units))
}

pub fn outcome(ctx: &BuildContext, persistence_units: Vec<PersistenceUnit>) -> BuildOutcome {
    let count = |kind: ExtensionKind| ctx.extensions.iter().filter(|e| e.kind() == kind).count();
    BuildOutcome {
        extensions: ctx.extensions.iter().cloned().collect(),
        persistence_units,
        runtime_dependencies: ctx.runtime.iter().cloned().collect(),
        discovery: DiscoveryStats {
            probes: ctx.probe_count(),
            declared: count(ExtensionKind::Declared),
            implicit: count(ExtensionKind::Implicit),
            transitive: count(ExtensionKind::Transitive),
        },
        dependencies: ctx.dependencies.len(),
        indexed_classes: ctx.composite.class_count(),
    }
}
