//! Hibernate ORM extension support: database families and the JDBC
//! extension each one implies.

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::coordinate::{Coordinate, QUARKUS_GROUP};
use crate::error::ConfigError;
use crate::extension::{ExtensionKind, ExtensionRegistry, ExtensionRequest, ExtensionSpec};
use crate::persistence::PersistenceUnitConfig;

pub const HIBERNATE_ORM_NAME: &str = "hibernateOrm";
pub const HIBERNATE_ORM_SHORT_NAME: &str = "hibernate-orm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseFamily {
    Derby,
    H2,
}

impl DatabaseFamily {
    pub const ALL: [DatabaseFamily; 2] = [DatabaseFamily::Derby, DatabaseFamily::H2];

    pub fn simple_name(self) -> &'static str {
        match self {
            DatabaseFamily::Derby => "derby",
            DatabaseFamily::H2 => "h2",
        }
    }

    /// `quarkus-jdbc-<name>`
    pub fn artifact_id(self) -> String {
        format!("quarkus-jdbc-{}", self.simple_name())
    }

    /// `jdbc:<name>:`
    pub fn jdbc_url_protocol(self) -> String {
        format!("jdbc:{}:", self.simple_name())
    }

    pub fn from_url(url: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| url.starts_with(&f.jdbc_url_protocol()))
    }

    pub fn coordinate(self, quarkus_version: &str) -> Coordinate {
        Coordinate::new(QUARKUS_GROUP, self.artifact_id(), quarkus_version)
    }
}

impl fmt::Display for DatabaseFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.simple_name())
    }
}

impl FromStr for DatabaseFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.simple_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownDatabaseFamily {
                name: s.to_string(),
            })
    }
}

impl Serialize for DatabaseFamily {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.simple_name())
    }
}

impl<'de> Deserialize<'de> for DatabaseFamily {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrmConfig {
    #[serde(default)]
    pub database_family: Option<DatabaseFamily>,
    #[serde(default)]
    pub persistence_units: Vec<PersistenceUnitConfig>,
}

impl OrmConfig {
    /// The `hibernate-orm` extension every ORM configuration implies.
    pub fn extension_spec() -> ExtensionSpec {
        ExtensionSpec::quarkus(HIBERNATE_ORM_NAME, HIBERNATE_ORM_SHORT_NAME)
    }

    pub fn database_family(&self) -> Result<DatabaseFamily> {
        self.database_family
            .ok_or_else(|| ConfigError::MissingDatabaseFamily.into())
    }

    /// The JDBC extension for the configured family, unless one is already
    /// registered under its coordinate.
    pub fn jdbc_extension(
        &self,
        extensions: &ExtensionRegistry,
        quarkus_version: Option<&str>,
    ) -> Result<Option<ExtensionRequest>> {
        let family = self.database_family()?;
        let version = quarkus_version.ok_or_else(|| ConfigError::MissingQuarkusVersion {
            extension: HIBERNATE_ORM_NAME.to_string(),
        })?;
        let coordinate = family.coordinate(version);
        if extensions.contains_coordinate(&coordinate) {
            return Ok(None);
        }
        Ok(Some(ExtensionRequest::for_coordinate(
            family.artifact_id(),
            ExtensionKind::Transitive,
            &coordinate,
        )))
    }
}
