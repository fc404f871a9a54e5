use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

pub const QUARKUS_GROUP: &str = "io.quarkus";
pub const QUARKUS_PREFIX: &str = "quarkus";
pub const DEPLOYMENT_SUFFIX: &str = "-deployment";

/// `group:artifact:version` identity of a resolved artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    group: String,
    artifact: String,
    version: String,
}

impl Coordinate {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    /// `io.quarkus:quarkus-<short>:<version>`
    pub fn quarkus(short_name: &str, version: &str) -> Self {
        Self::new(
            QUARKUS_GROUP,
            format!("{QUARKUS_PREFIX}-{short_name}"),
            version,
        )
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Canonical identity key.
    pub fn gav(&self) -> String {
        self.to_string()
    }

    /// Sibling `<artifact>-deployment` with the same group and version.
    pub fn deployment_counterpart(&self) -> Self {
        Self::new(
            self.group.clone(),
            format!("{}{DEPLOYMENT_SUFFIX}", self.artifact),
            self.version.clone(),
        )
    }

    pub fn to_notation(&self) -> DependencyNotation {
        DependencyNotation {
            group: self.group.clone(),
            artifact: self.artifact.clone(),
            version: Some(self.version.clone()),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let notation: DependencyNotation = s.parse()?;
        match notation.version {
            Some(version) => Ok(Coordinate::new(notation.group, notation.artifact, version)),
            None => Err(ConfigError::InvalidCoordinate {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// `group:artifact[:version]` as written in a build description.
///
/// A notation without a version matches every version of the module present
/// in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyNotation {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
}

impl DependencyNotation {
    pub fn matches(&self, coordinate: &Coordinate) -> bool {
        self.group == coordinate.group()
            && self.artifact == coordinate.artifact()
            && self
                .version
                .as_deref()
                .is_none_or(|v| v == coordinate.version())
    }
}

impl fmt::Display for DependencyNotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}:{v}", self.group, self.artifact),
            None => write!(f, "{}:{}", self.group, self.artifact),
        }
    }
}

impl FromStr for DependencyNotation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidCoordinate {
            value: s.to_string(),
        };
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid());
        }
        match parts.as_slice() {
            [group, artifact] => Ok(Self {
                group: group.trim().to_string(),
                artifact: artifact.trim().to_string(),
                version: None,
            }),
            [group, artifact, version] => Ok(Self {
                group: group.trim().to_string(),
                artifact: artifact.trim().to_string(),
                version: Some(version.trim().to_string()),
            }),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for DependencyNotation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DependencyNotation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
