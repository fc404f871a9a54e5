//! # extension-finder
//!
//! Discovers Quarkus-style extensions across a resolved dependency graph and
//! classifies annotated classes into JPA persistence units.
//!
//! ## Architecture
//!
//! - **coordinate**: `group:artifact:version` coordinates and notations
//! - **artifact**: Read-only views of jars and class directories
//! - **classfile**: Class-file annotation reader
//! - **index**: Per-artifact annotation index
//! - **composite**: Union of indexes across the registered dependencies
//! - **store**: LMDB-backed index store keyed by artifact fingerprint
//! - **indexer**: Embedded index, stored index, or class scan, in that order
//! - **dependency**: One shared record per resolved coordinate
//! - **resolver**: Dependency resolution seam and the manifest-backed resolver
//! - **extension**: Extension records, the registry, and the marker file
//! - **context**: Per-build state shared by discovery and classification
//! - **discovery**: Worklist-driven extension discovery
//! - **persistence**: Persistence-unit classification
//! - **orm**: Hibernate ORM database families and their JDBC extensions
//! - **build**: A full pass over a JSON build description

pub mod artifact;
pub mod build;
pub mod classfile;
pub mod cli;
pub mod composite;
pub mod config;
pub mod context;
pub mod coordinate;
pub mod dependency;
pub mod discovery;
pub mod error;
pub mod extension;
pub mod index;
pub mod indexer;
pub mod orm;
pub mod persistence;
pub mod resolver;
pub mod store;
