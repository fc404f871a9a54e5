//! Dependency resolution, the build tool's side of the contract.
//!
//! [`ManifestResolver`] answers from an explicit artifact graph. Artifacts
//! without a path are looked up in a local Maven repository layout.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::coordinate::{Coordinate, DependencyNotation};
use crate::error::ConfigError;

pub const POM_CLASSIFIER: &str = "pom";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub coordinate: Coordinate,
    pub path: PathBuf,
    pub classifier: Option<String>,
}

impl ResolvedArtifact {
    pub fn new(coordinate: Coordinate, path: impl Into<PathBuf>) -> Self {
        Self {
            coordinate,
            path: path.into(),
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn is_pom(&self) -> bool {
        self.classifier.as_deref() == Some(POM_CLASSIFIER)
    }
}

pub trait DependencyResolver {
    /// Every artifact in the graph matching `notation`.
    fn resolve_artifact(&self, notation: &DependencyNotation) -> Result<Vec<ResolvedArtifact>>;

    /// Roots plus everything they depend on, transitively, each once, in
    /// first-seen order.
    fn resolve_closure(&self, roots: &[Coordinate]) -> Result<Vec<ResolvedArtifact>>;
}

/// One node of the artifact graph as written in a build description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub coordinate: Coordinate,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub classifier: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Coordinate>,
}

#[derive(Debug, Clone)]
struct Node {
    artifact: ResolvedArtifact,
    dependencies: Vec<Coordinate>,
}

#[derive(Debug, Clone, Default)]
pub struct ManifestResolver {
    nodes: BTreeMap<String, Node>,
}

impl ManifestResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative paths resolve against `base_dir`; missing ones against the
    /// Maven layout under `repository`.
    pub fn from_entries(entries: &[ArtifactEntry], base_dir: &Path, repository: &Path) -> Self {
        let mut resolver = Self::new();
        for entry in entries {
            let path = match &entry.path {
                Some(p) if p.is_absolute() => p.clone(),
                Some(p) => base_dir.join(p),
                None => maven_path(repository, &entry.coordinate, entry.classifier.as_deref()),
            };
            let mut artifact = ResolvedArtifact::new(entry.coordinate.clone(), path);
            artifact.classifier = entry.classifier.clone();
            resolver.add(artifact, entry.dependencies.clone());
        }
        resolver
    }

    pub fn add(&mut self, artifact: ResolvedArtifact, dependencies: Vec<Coordinate>) -> &mut Self {
        self.nodes.insert(
            artifact.coordinate.gav(),
            Node {
                artifact,
                dependencies,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, coordinate: &Coordinate) -> Result<&Node> {
        self.nodes.get(&coordinate.gav()).ok_or_else(|| {
            ConfigError::UnknownArtifact {
                coordinate: coordinate.gav(),
            }
            .into()
        })
    }
}

impl DependencyResolver for ManifestResolver {
    fn resolve_artifact(&self, notation: &DependencyNotation) -> Result<Vec<ResolvedArtifact>> {
        Ok(self
            .nodes
            .values()
            .filter(|n| notation.matches(&n.artifact.coordinate))
            .map(|n| n.artifact.clone())
            .collect())
    }

    fn resolve_closure(&self, roots: &[Coordinate]) -> Result<Vec<ResolvedArtifact>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<&Coordinate> = roots.iter().rev().collect();

        while let Some(current) = stack.pop() {
            if !seen.insert(current.gav()) {
                continue;
            }
            let node = self.node(current)?;
            out.push(node.artifact.clone());
            stack.extend(node.dependencies.iter().rev());
        }
        Ok(out)
    }
}

pub fn default_m2_repository() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Failed to resolve home directory"))?;
    Ok(home.join(".m2").join("repository"))
}

/// `<repo>/<group path>/<artifact>/<version>/<artifact>-<version>.jar`
pub fn maven_path(repository: &Path, coordinate: &Coordinate, classifier: Option<&str>) -> PathBuf {
    let mut dir = repository.to_path_buf();
    for part in coordinate.group().split('.') {
        dir.push(part);
    }
    dir.push(coordinate.artifact());
    dir.push(coordinate.version());

    let file = match classifier {
        Some(POM_CLASSIFIER) => format!("{}-{}.pom", coordinate.artifact(), coordinate.version()),
        Some(c) => format!("{}-{}-{c}.jar", coordinate.artifact(), coordinate.version()),
        None => format!("{}-{}.jar", coordinate.artifact(), coordinate.version()),
    };
    dir.join(file)
}

/// Inverse of [`maven_path`] for a jar inside `repository`.
pub fn coordinate_from_maven_path(repository: &Path, jar_path: &Path) -> Option<Coordinate> {
    let relative = jar_path.strip_prefix(repository).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    let [group @ .., artifact, version, _file] = parts.as_slice() else {
        return None;
    };
    if group.is_empty() {
        return None;
    }
    Some(Coordinate::new(group.join("."), artifact, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Coordinate {
        s.parse().unwrap()
    }

    fn graph() -> ManifestResolver {
        let mut r = ManifestResolver::new();
        r.add(ResolvedArtifact::new(c("g:root:1"), "/r"), vec![c("g:left:1"), c("g:right:1")])
            .add(ResolvedArtifact::new(c("g:left:1"), "/l"), vec![c("g:shared:1")])
            .add(ResolvedArtifact::new(c("g:right:1"), "/rt"), vec![c("g:shared:1")])
            .add(ResolvedArtifact::new(c("g:shared:1"), "/s"), vec![c("g:root:1")])
            .add(ResolvedArtifact::new(c("g:shared:2"), "/s2"), vec![]);
        r
    }

    #[test]
    fn closure_is_depth_first_deduplicated_and_cycle_safe() -> Result<()> {
        let closure = graph().resolve_closure(&[c("g:root:1")])?;
        let names: Vec<_> = closure.iter().map(|a| a.coordinate.gav()).collect();
        assert_eq!(names, vec!["g:root:1", "g:left:1", "g:shared:1", "g:right:1"]);
        Ok(())
    }

    #[test]
    fn unknown_node_is_a_config_error() {
        let mut r = graph();
        r.add(ResolvedArtifact::new(c("g:broken:1"), "/b"), vec![c("g:ghost:1")]);
        let err = r.resolve_closure(&[c("g:broken:1")]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnknownArtifact {
                coordinate: "g:ghost:1".into()
            })
        );
    }

    #[test]
    fn versionless_notation_matches_all_versions() -> Result<()> {
        let r = graph();
        assert_eq!(r.resolve_artifact(&"g:shared".parse()?)?.len(), 2);
        assert_eq!(r.resolve_artifact(&"g:shared:2".parse()?)?.len(), 1);
        assert!(r.resolve_artifact(&"g:nothing".parse()?)?.is_empty());
        Ok(())
    }

    #[test]
    fn entries_fall_back_to_maven_layout() {
        let entries = vec![
            ArtifactEntry {
                coordinate: c("org.acme:lib:1.0"),
                path: None,
                classifier: None,
                dependencies: vec![],
            },
            ArtifactEntry {
                coordinate: c("org.acme:bom:1.0"),
                path: None,
                classifier: Some("pom".into()),
                dependencies: vec![],
            },
            ArtifactEntry {
                coordinate: c("org.acme:local:1.0"),
                path: Some(PathBuf::from("libs/local.jar")),
                classifier: None,
                dependencies: vec![],
            },
        ];
        let r = ManifestResolver::from_entries(&entries, Path::new("/work"), Path::new("/m2"));
        let lib = r.node(&c("org.acme:lib:1.0")).unwrap();
        assert_eq!(
            lib.artifact.path,
            PathBuf::from("/m2/org/acme/lib/1.0/lib-1.0.jar")
        );
        let bom = r.node(&c("org.acme:bom:1.0")).unwrap();
        assert!(bom.artifact.is_pom());
        assert!(bom.artifact.path.ends_with("bom-1.0.pom"));
        let local = r.node(&c("org.acme:local:1.0")).unwrap();
        assert_eq!(local.artifact.path, PathBuf::from("/work/libs/local.jar"));
    }

    #[test]
    fn coordinate_round_trips_through_maven_path() {
        let repo = Path::new("/m2");
        let coord = c("org.example.deep:demo:2.1");
        let path = maven_path(repo, &coord, None);
        assert_eq!(coordinate_from_maven_path(repo, &path), Some(coord));
        assert_eq!(coordinate_from_maven_path(repo, Path::new("/m2/demo.jar")), None);
        assert_eq!(coordinate_from_maven_path(repo, Path::new("/elsewhere/a/b/1/b-1.jar")), None);
    }
}
