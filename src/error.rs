//! Configuration errors raised while resolving a build.
//!
//! These travel inside `anyhow::Error` like every other failure in the crate;
//! callers that need to react to a specific condition use
//! `err.downcast_ref::<ConfigError>()`.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("extension `{extension}`: expected exactly one artifact for `{notation}` but found {found}")]
    ArtifactCount {
        extension: String,
        notation: String,
        found: usize,
    },

    #[error("persistence unit `{unit}`: cannot classify an unresolved dependency `{coordinate}`")]
    UnresolvedPersistenceDependency { unit: String, coordinate: String },

    #[error("an extension is already registered under `{key}`")]
    DuplicateExtension { key: String },

    #[error("persistence unit `{unit}` is configured more than once")]
    DuplicatePersistenceUnit { unit: String },

    #[error("invalid dependency coordinate `{value}` (expected group:artifact[:version])")]
    InvalidCoordinate { value: String },

    #[error("extension `{extension}` uses a Quarkus short name but no quarkus_version is configured")]
    MissingQuarkusVersion { extension: String },

    #[error("no database family was specified for the hibernate-orm extension")]
    MissingDatabaseFamily,

    #[error("unknown database family `{name}` (supported: derby, h2)")]
    UnknownDatabaseFamily { name: String },

    #[error("extension `{extension}` defines neither `artifact` nor `quarkus`")]
    MissingArtifactSpec { extension: String },

    #[error("artifact `{coordinate}` is not part of the dependency graph")]
    UnknownArtifact { coordinate: String },
}
