//! Persistence-unit resolution.
//!
//! Every configured unit first receives the managed classes of the
//! dependencies it names explicitly. Each runtime dependency that no unit
//! named is then classified into *every* unit. That default-inclusion policy
//! can put the same entity in several units when more than one unit is
//! configured without explicit scoping; it is kept deliberately.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::composite::CompositeIndex;
use crate::context::BuildContext;
use crate::coordinate::Coordinate;
use crate::error::ConfigError;
use crate::index::{AnnotationIndex, AnnotationTarget};

pub const JPA_ENTITY: &str = "javax.persistence.Entity";
pub const JPA_EMBEDDABLE: &str = "javax.persistence.Embeddable";
pub const JPA_EMBEDDED: &str = "javax.persistence.Embedded";
pub const JPA_EMBEDDED_ID: &str = "javax.persistence.EmbeddedId";
pub const JPA_CONVERTER_ANN: &str = "javax.persistence.Converter";
pub const JPA_CONVERTER: &str = "javax.persistence.AttributeConverter";

pub const JAKARTA_ENTITY: &str = "jakarta.persistence.Entity";
pub const JAKARTA_EMBEDDABLE: &str = "jakarta.persistence.Embeddable";
pub const JAKARTA_EMBEDDED: &str = "jakarta.persistence.Embedded";
pub const JAKARTA_EMBEDDED_ID: &str = "jakarta.persistence.EmbeddedId";
pub const JAKARTA_CONVERTER_ANN: &str = "jakarta.persistence.Converter";
pub const JAKARTA_CONVERTER: &str = "jakarta.persistence.AttributeConverter";

pub const HHH_ENTITY: &str = "org.hibernate.annotations.Entity";

/// Class-level annotations marking a managed type.
pub const MANAGED_TYPE_ANNOTATIONS: &[&str] = &[
    JPA_ENTITY,
    JPA_CONVERTER_ANN,
    JPA_EMBEDDABLE,
    JAKARTA_ENTITY,
    JAKARTA_CONVERTER_ANN,
    JAKARTA_EMBEDDABLE,
    HHH_ENTITY,
];

/// Field/getter annotations whose (return) type is managed too.
pub const EMBEDDING_ANNOTATIONS: &[&str] = &[
    JPA_EMBEDDED,
    JPA_EMBEDDED_ID,
    JAKARTA_EMBEDDED,
    JAKARTA_EMBEDDED_ID,
];

pub const CONVERTER_CONTRACTS: &[&str] = &[JPA_CONVERTER, JAKARTA_CONVERTER];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceUnitConfig {
    pub name: String,
    /// Dependencies whose classes belong to this unit.
    #[serde(default)]
    pub include: Vec<Coordinate>,
}

impl PersistenceUnitConfig {
    pub fn new(name: impl Into<String>, include: Vec<Coordinate>) -> Self {
        Self {
            name: name.into(),
            include,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceUnit {
    name: String,
    classes: BTreeSet<String>,
}

impl PersistenceUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted class names.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(String::as_str)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

pub fn resolve_persistence_units(
    ctx: &BuildContext,
    configs: &[PersistenceUnitConfig],
) -> Result<Vec<PersistenceUnit>> {
    let mut names = HashSet::new();
    for config in configs {
        if !names.insert(config.name.as_str()) {
            return Err(ConfigError::DuplicatePersistenceUnit {
                unit: config.name.clone(),
            }
            .into());
        }
    }

    let classifier = Classifier::new(&ctx.composite);
    let mut units: Vec<BTreeSet<String>> = vec![BTreeSet::new(); configs.len()];
    let mut claimed: HashSet<&Coordinate> = HashSet::new();

    for (config, classes) in configs.iter().zip(units.iter_mut()) {
        for coordinate in &config.include {
            let dependency = ctx.dependencies.get(coordinate).ok_or_else(|| {
                ConfigError::UnresolvedPersistenceDependency {
                    unit: config.name.clone(),
                    coordinate: coordinate.gav(),
                }
            })?;
            classifier.classify(&dependency.index(ctx.indexer()), classes);
            claimed.insert(coordinate);
        }
    }

    for coordinate in ctx.runtime.iter() {
        if claimed.contains(coordinate) {
            continue;
        }
        let Some(dependency) = ctx.dependencies.get(coordinate) else {
            tracing::debug!(%coordinate, "Runtime dependency was never registered");
            continue;
        };
        let mut found = BTreeSet::new();
        classifier.classify(&dependency.index(ctx.indexer()), &mut found);
        if found.is_empty() {
            continue;
        }
        tracing::debug!(%coordinate, classes = found.len(), "Applying unclaimed dependency to every unit");
        for classes in &mut units {
            classes.extend(found.iter().cloned());
        }
    }

    Ok(configs
        .iter()
        .zip(units)
        .map(|(config, classes)| PersistenceUnit {
            name: config.name.clone(),
            classes,
        })
        .collect())
}

struct Classifier<'a> {
    composite: &'a CompositeIndex,
    converters: BTreeSet<String>,
}

impl<'a> Classifier<'a> {
    fn new(composite: &'a CompositeIndex) -> Self {
        let converters = CONVERTER_CONTRACTS
            .iter()
            .flat_map(|contract| composite.implementors_of(contract))
            .collect();
        Self {
            composite,
            converters,
        }
    }

    fn classify(&self, index: &AnnotationIndex, classes: &mut BTreeSet<String>) {
        for annotation in MANAGED_TYPE_ANNOTATIONS {
            for class in index.classes_annotated_with(annotation, self.composite) {
                classes.insert(class.name.clone());
            }
        }

        for annotation in EMBEDDING_ANNOTATIONS {
            for usage in index.annotation_usages(annotation) {
                let referenced = match &usage.target {
                    AnnotationTarget::Field { type_name, .. } => type_name,
                    AnnotationTarget::Method {
                        class,
                        method,
                        return_type,
                    } => {
                        if !is_getter(method) {
                            tracing::debug!(%class, %method, annotation, "Ignoring annotated non-getter method");
                            continue;
                        }
                        return_type
                    }
                    AnnotationTarget::Class { class } => {
                        tracing::debug!(%class, annotation, "Ignoring class-level embedding annotation");
                        continue;
                    }
                };
                match self.composite.class_by_name(referenced) {
                    Some(info) => {
                        classes.insert(info.name.clone());
                    }
                    None => tracing::debug!(class = %referenced, "Could not locate referenced class type"),
                }
            }
        }

        classes.extend(
            self.converters
                .iter()
                .filter(|name| index.contains(name))
                .cloned(),
        );
    }
}

fn is_getter(method: &str) -> bool {
    let starts_upper = |rest: &str| rest.chars().next().is_some_and(char::is_uppercase);
    method.strip_prefix("get").is_some_and(starts_upper)
        || method.strip_prefix("is").is_some_and(starts_upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{MemoryArtifactSource, MemoryTree};
    use crate::classfile::fixture::encode_class;
    use crate::index::{AnnotationInstance, AnnotationValue, ClassInfo, FieldInfo, MethodInfo};
    use crate::indexer::ArtifactIndexer;
    use crate::resolver::ResolvedArtifact;
    use crate::store::NoIndexStore;
    use std::sync::Arc;

    fn c(s: &str) -> Coordinate {
        s.parse().unwrap()
    }

    fn entity(name: &str) -> ClassInfo {
        ClassInfo::new(name).annotated(AnnotationInstance::new(JPA_ENTITY))
    }

    /// Registers each `(gav, classes)` pair as a runtime dependency.
    fn context(deps: Vec<(&str, Vec<ClassInfo>)>) -> BuildContext {
        let mut source = MemoryArtifactSource::new();
        let mut artifacts = Vec::new();
        for (gav, classes) in &deps {
            let mut tree = MemoryTree::new();
            for class in classes {
                tree = tree.with_entry(
                    format!("{}.class", class.name.replace('.', "/")),
                    encode_class(class),
                );
            }
            let location = format!("mem:{gav}");
            source.insert(location.clone(), tree);
            artifacts.push(ResolvedArtifact::new(c(gav), location));
        }
        let mut ctx = BuildContext::new(ArtifactIndexer::new(
            Arc::new(source),
            Arc::new(NoIndexStore),
        ));
        ctx.register_artifacts(&artifacts);
        for artifact in &artifacts {
            ctx.runtime.insert(&artifact.coordinate);
        }
        ctx
    }

    fn unit<'a>(units: &'a [PersistenceUnit], name: &str) -> &'a PersistenceUnit {
        units.iter().find(|u| u.name() == name).unwrap()
    }

    #[test]
    fn explicit_claims_exclude_other_units_and_unclaimed_go_everywhere() -> Result<()> {
        let ctx = context(vec![
            ("g:d:1", vec![entity("d.Foo")]),
            ("g:e:1", vec![entity("e.Shared")]),
        ]);
        let units = resolve_persistence_units(
            &ctx,
            &[
                PersistenceUnitConfig::new("abc", vec![c("g:d:1")]),
                PersistenceUnitConfig::new("xyz", vec![]),
            ],
        )?;

        let abc = unit(&units, "abc");
        let xyz = unit(&units, "xyz");
        assert!(abc.contains("d.Foo"));
        assert!(!xyz.contains("d.Foo"));
        assert!(xyz.contains("e.Shared"));
        assert!(abc.contains("e.Shared"));
        Ok(())
    }

    #[test]
    fn units_come_back_in_configuration_order() -> Result<()> {
        let ctx = context(vec![]);
        let units = resolve_persistence_units(
            &ctx,
            &[
                PersistenceUnitConfig::new("zeta", vec![]),
                PersistenceUnitConfig::new("alpha", vec![]),
            ],
        )?;
        let names: Vec<_> = units.iter().map(PersistenceUnit::name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        Ok(())
    }

    #[test]
    fn embedded_type_is_added_only_when_indexed() -> Result<()> {
        let owner = entity("app.Owner").with_field(FieldInfo {
            name: "bar".into(),
            type_name: "app.Bar".into(),
            annotations: vec![AnnotationInstance::new(JPA_EMBEDDED)],
        });

        let present = context(vec![("g:app:1", vec![owner.clone(), ClassInfo::new("app.Bar")])]);
        let units =
            resolve_persistence_units(&present, &[PersistenceUnitConfig::new("pu", vec![])])?;
        assert!(units[0].contains("app.Bar"));

        let absent = context(vec![("g:app:1", vec![owner])]);
        let units =
            resolve_persistence_units(&absent, &[PersistenceUnitConfig::new("pu", vec![])])?;
        assert!(!units[0].contains("app.Bar"));
        assert!(units[0].contains("app.Owner"));
        Ok(())
    }

    #[test]
    fn embedded_type_may_live_in_another_dependency() -> Result<()> {
        let owner = entity("app.Owner").with_method(MethodInfo {
            name: "getId".into(),
            return_type: "lib.Key".into(),
            annotations: vec![AnnotationInstance::new(JAKARTA_EMBEDDED_ID)],
        });
        let helper = ClassInfo::new("app.Helper").with_method(MethodInfo {
            name: "compute".into(),
            return_type: "lib.Other".into(),
            annotations: vec![AnnotationInstance::new(JPA_EMBEDDED)],
        });
        let ctx = context(vec![
            ("g:app:1", vec![owner, helper]),
            ("g:lib:1", vec![ClassInfo::new("lib.Key"), ClassInfo::new("lib.Other")]),
        ]);
        let units = resolve_persistence_units(
            &ctx,
            &[
                PersistenceUnitConfig::new("main", vec![c("g:app:1")]),
                PersistenceUnitConfig::new("libs", vec![c("g:lib:1")]),
            ],
        )?;
        let main = unit(&units, "main");
        assert!(main.contains("lib.Key"));
        assert!(!main.contains("lib.Other"));
        assert!(unit(&units, "libs").is_empty());
        Ok(())
    }

    #[test]
    fn converters_are_scoped_to_the_classified_dependency() -> Result<()> {
        let ctx = context(vec![
            (
                "g:a:1",
                vec![
                    ClassInfo::new("a.BaseConverter").implementing(JPA_CONVERTER),
                    ClassInfo::new("a.Plain"),
                ],
            ),
            (
                "g:b:1",
                vec![
                    ClassInfo::new("b.Special").extending("a.BaseConverter"),
                    ClassInfo::new("b.Annotated")
                        .annotated(AnnotationInstance::new(JAKARTA_CONVERTER_ANN)),
                ],
            ),
        ]);
        let units = resolve_persistence_units(
            &ctx,
            &[
                PersistenceUnitConfig::new("first", vec![c("g:a:1")]),
                PersistenceUnitConfig::new("second", vec![c("g:b:1")]),
            ],
        )?;
        let first: Vec<_> = unit(&units, "first").classes().collect();
        let second: Vec<_> = unit(&units, "second").classes().collect();
        assert_eq!(first, vec!["a.BaseConverter"]);
        assert_eq!(second, vec!["b.Annotated", "b.Special"]);
        Ok(())
    }

    #[test]
    fn repeatable_hibernate_entity_is_found_through_its_container() -> Result<()> {
        let multi = ClassInfo::new("app.Multi").annotated(
            AnnotationInstance::new("org.hibernate.annotations.Entities").with_value(
                "value",
                AnnotationValue::Array(vec![AnnotationValue::Annotation(
                    AnnotationInstance::new(HHH_ENTITY),
                )]),
            ),
        );
        let ctx = context(vec![("g:app:1", vec![multi])]);
        let units = resolve_persistence_units(&ctx, &[PersistenceUnitConfig::new("pu", vec![])])?;
        assert!(units[0].contains("app.Multi"));
        Ok(())
    }

    #[test]
    fn unresolved_explicit_dependency_is_a_config_error() {
        let ctx = context(vec![]);
        let err = resolve_persistence_units(
            &ctx,
            &[PersistenceUnitConfig::new("abc", vec![c("g:missing:1")])],
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnresolvedPersistenceDependency {
                unit: "abc".into(),
                coordinate: "g:missing:1".into()
            })
        );
    }

    #[test]
    fn duplicate_unit_names_are_rejected() {
        let ctx = context(vec![]);
        let err = resolve_persistence_units(
            &ctx,
            &[
                PersistenceUnitConfig::new("pu", vec![]),
                PersistenceUnitConfig::new("pu", vec![]),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::DuplicatePersistenceUnit { .. })
        ));
    }

    #[test]
    fn getter_detection() {
        assert!(is_getter("getName"));
        assert!(is_getter("isActive"));
        assert!(!is_getter("get"));
        assert!(!is_getter("getter"));
        assert!(!is_getter("compute"));
    }
}
