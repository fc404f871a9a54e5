//! Extensions and the registry that finds them by name or coordinate.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::coordinate::{Coordinate, DependencyNotation};
use crate::error::ConfigError;

/// Present in every artifact that is itself an extension.
pub const MARKER_PATH: &str = "META-INF/quarkus-extension.properties";
pub const DEPLOYMENT_ARTIFACT_KEY: &str = "deployment-artifact";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Declared,
    Implicit,
    Transitive,
}

/// Progress of a registered extension.
///
/// The declared stage is an [`ExtensionRequest`]; an [`Extension`] only
/// exists once its runtime artifact is resolved, so it starts at
/// `ArtifactResolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    ArtifactResolved,
    DependenciesWalked,
}

/// One extension as configured in a build description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<DependencyNotation>,
    /// Short name of an `io.quarkus:quarkus-<short>` extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarkus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_artifact: Option<DependencyNotation>,
    #[serde(default)]
    pub runtime_dependencies: Vec<DependencyNotation>,
    #[serde(default)]
    pub deployment_dependencies: Vec<DependencyNotation>,
}

impl ExtensionSpec {
    pub fn artifact(name: impl Into<String>, notation: DependencyNotation) -> Self {
        Self {
            name: name.into(),
            artifact: Some(notation),
            ..Self::default()
        }
    }

    pub fn quarkus(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quarkus: Some(short_name.into()),
            ..Self::default()
        }
    }

    pub fn into_request(self, quarkus_version: Option<&str>) -> Result<ExtensionRequest> {
        let artifact = match (self.artifact, self.quarkus.as_deref()) {
            (Some(notation), _) => notation,
            (None, Some(short)) => {
                let version = quarkus_version.ok_or_else(|| ConfigError::MissingQuarkusVersion {
                    extension: self.name.clone(),
                })?;
                Coordinate::quarkus(short, version).to_notation()
            }
            (None, None) => {
                return Err(ConfigError::MissingArtifactSpec {
                    extension: self.name,
                }
                .into());
            }
        };
        Ok(ExtensionRequest {
            name: self.name,
            kind: ExtensionKind::Declared,
            artifact,
            deployment: self.deployment_artifact,
            runtime_dependencies: self.runtime_dependencies,
            deployment_dependencies: self.deployment_dependencies,
        })
    }
}

/// An extension waiting for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRequest {
    pub name: String,
    pub kind: ExtensionKind,
    pub artifact: DependencyNotation,
    /// Explicit deployment artifact; resolved strictly when present.
    pub deployment: Option<DependencyNotation>,
    pub runtime_dependencies: Vec<DependencyNotation>,
    pub deployment_dependencies: Vec<DependencyNotation>,
}

impl ExtensionRequest {
    /// An extension detected from (or synthesized for) a known coordinate.
    /// Its own coordinate doubles as its declared runtime dependency.
    pub fn for_coordinate(name: impl Into<String>, kind: ExtensionKind, coordinate: &Coordinate) -> Self {
        Self {
            name: name.into(),
            kind,
            artifact: coordinate.to_notation(),
            deployment: None,
            runtime_dependencies: vec![coordinate.to_notation()],
            deployment_dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    name: String,
    kind: ExtensionKind,
    artifact: Coordinate,
    deployment: Option<Coordinate>,
    runtime_dependencies: Vec<DependencyNotation>,
    deployment_dependencies: Vec<DependencyNotation>,
    state: ExtensionState,
}

impl Extension {
    pub fn new(request: ExtensionRequest, artifact: Coordinate) -> Self {
        Self {
            name: request.name,
            kind: request.kind,
            artifact,
            deployment: None,
            runtime_dependencies: request.runtime_dependencies,
            deployment_dependencies: request.deployment_dependencies,
            state: ExtensionState::ArtifactResolved,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    pub fn artifact(&self) -> &Coordinate {
        &self.artifact
    }

    pub fn deployment(&self) -> Option<&Coordinate> {
        self.deployment.as_ref()
    }

    pub fn runtime_dependencies(&self) -> &[DependencyNotation] {
        &self.runtime_dependencies
    }

    pub fn deployment_dependencies(&self) -> &[DependencyNotation] {
        &self.deployment_dependencies
    }

    pub fn state(&self) -> ExtensionState {
        self.state
    }
}

#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Extension>,
    by_name: HashMap<String, usize>,
    by_coordinate: HashMap<String, usize>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the name or the runtime coordinate is already taken.
    pub fn register(&mut self, extension: Extension) -> Result<usize> {
        if self.by_name.contains_key(&extension.name) {
            return Err(ConfigError::DuplicateExtension {
                key: extension.name,
            }
            .into());
        }
        let gav = extension.artifact.gav();
        if self.by_coordinate.contains_key(&gav) {
            return Err(ConfigError::DuplicateExtension { key: gav }.into());
        }

        let id = self.extensions.len();
        self.by_name.insert(extension.name.clone(), id);
        self.by_coordinate.insert(gav, id);
        self.extensions.push(extension);
        Ok(id)
    }

    pub fn attach_deployment(&mut self, id: usize, deployment: Coordinate) -> Result<()> {
        let gav = deployment.gav();
        match self.by_coordinate.get(&gav) {
            Some(existing) if *existing == id => return Ok(()),
            Some(_) => return Err(ConfigError::DuplicateExtension { key: gav }.into()),
            None => {}
        }
        self.by_coordinate.insert(gav, id);
        self.extensions[id].deployment = Some(deployment);
        Ok(())
    }

    pub(crate) fn advance(&mut self, id: usize, state: ExtensionState) {
        let extension = &mut self.extensions[id];
        debug_assert!(extension.state <= state);
        extension.state = state;
    }

    pub fn get(&self, id: usize) -> Option<&Extension> {
        self.extensions.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Extension> {
        self.by_name.get(name).map(|i| &self.extensions[*i])
    }

    /// Finds the extension owning `coordinate` as runtime or deployment artifact.
    pub fn by_coordinate(&self, coordinate: &Coordinate) -> Option<&Extension> {
        self.by_gav(&coordinate.gav())
    }

    pub fn by_gav(&self, gav: &str) -> Option<&Extension> {
        self.by_coordinate.get(gav).map(|i| &self.extensions[*i])
    }

    pub fn contains_coordinate(&self, coordinate: &Coordinate) -> bool {
        self.by_coordinate.contains_key(&coordinate.gav())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.iter()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

/// Key/values of an extension marker file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionMarker {
    properties: BTreeMap<String, String>,
}

impl ExtensionMarker {
    /// Parses the simple `key=value` / `key: value` subset of Java properties.
    pub fn parse(raw: &str) -> Self {
        let mut properties = BTreeMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(['=', ':']) {
                Some(pos) => (&line[..pos], &line[pos + 1..]),
                None => (line, ""),
            };
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self { properties }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn deployment_artifact(&self) -> Option<&str> {
        self.get(DEPLOYMENT_ARTIFACT_KEY).filter(|v| !v.is_empty())
    }
}
