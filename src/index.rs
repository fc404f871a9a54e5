//! Per-artifact annotation index.
//!
//! The index is a class table plus three derived lookups: annotation usages by
//! annotation name, direct subclasses by super class, and direct implementors
//! by interface. Only the class table is serialized; the lookups are rebuilt
//! whenever an index is loaded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::composite::CompositeIndex;

pub const REPEATABLE: &str = "java.lang.annotation.Repeatable";
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationValue {
    Class(String),
    Annotation(AnnotationInstance),
    Array(Vec<AnnotationValue>),
    Enum { type_name: String, constant: String },
    Constant(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationInstance {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<(String, AnnotationValue)>,
}

impl AnnotationInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: AnnotationValue) -> Self {
        self.values.push((key.into(), value));
        self
    }

    pub fn value(&self, key: &str) -> Option<&AnnotationValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Annotations nested in the `value` element, as a repeatable container holds them.
    pub fn nested(&self) -> Vec<&AnnotationInstance> {
        match self.value("value") {
            Some(AnnotationValue::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    AnnotationValue::Annotation(a) => Some(a),
                    _ => None,
                })
                .collect(),
            Some(AnnotationValue::Annotation(a)) => vec![a],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<AnnotationInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub return_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<AnnotationInstance>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFlags {
    pub interface: bool,
    pub annotation: bool,
    pub abstract_: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub flags: ClassFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<AnnotationInstance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MethodInfo>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: Some("java.lang.Object".to_string()),
            interfaces: Vec::new(),
            flags: ClassFlags::default(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn annotated(mut self, annotation: AnnotationInstance) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn extending(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn implementing(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn as_interface(mut self) -> Self {
        self.flags.interface = true;
        self.flags.abstract_ = true;
        self.superclass = Some("java.lang.Object".to_string());
        self
    }

    pub fn with_field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MethodInfo) -> Self {
        self.methods.push(method);
        self
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit(['.', '$']).next().unwrap_or(&self.name)
    }
}

/// Where an annotation was found.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnnotationTarget {
    Class {
        class: String,
    },
    Field {
        class: String,
        field: String,
        type_name: String,
    },
    Method {
        class: String,
        method: String,
        return_type: String,
    },
}

impl AnnotationTarget {
    pub fn class(&self) -> &str {
        match self {
            AnnotationTarget::Class { class }
            | AnnotationTarget::Field { class, .. }
            | AnnotationTarget::Method { class, .. } => class,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationUsage {
    pub instance: AnnotationInstance,
    pub target: AnnotationTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationIndex {
    classes: BTreeMap<String, ClassInfo>,
    usages: BTreeMap<String, Vec<AnnotationUsage>>,
    subclasses: BTreeMap<String, BTreeSet<String>>,
    implementors: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredIndex {
    version: u32,
    classes: Vec<ClassInfo>,
}

impl AnnotationIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_classes(classes: impl IntoIterator<Item = ClassInfo>) -> Self {
        let mut index = Self::default();
        for class in classes {
            index.classes.insert(class.name.clone(), class);
        }
        index.rebuild_lookups();
        index
    }

    fn rebuild_lookups(&mut self) {
        self.usages.clear();
        self.subclasses.clear();
        self.implementors.clear();

        for class in self.classes.values() {
            if let Some(superclass) = &class.superclass {
                self.subclasses
                    .entry(superclass.clone())
                    .or_default()
                    .insert(class.name.clone());
            }
            for interface in &class.interfaces {
                self.implementors
                    .entry(interface.clone())
                    .or_default()
                    .insert(class.name.clone());
            }

            for ann in &class.annotations {
                self.usages
                    .entry(ann.name.clone())
                    .or_default()
                    .push(AnnotationUsage {
                        instance: ann.clone(),
                        target: AnnotationTarget::Class {
                            class: class.name.clone(),
                        },
                    });
            }
            for field in &class.fields {
                for ann in &field.annotations {
                    self.usages
                        .entry(ann.name.clone())
                        .or_default()
                        .push(AnnotationUsage {
                            instance: ann.clone(),
                            target: AnnotationTarget::Field {
                                class: class.name.clone(),
                                field: field.name.clone(),
                                type_name: field.type_name.clone(),
                            },
                        });
                }
            }
            for method in &class.methods {
                for ann in &method.annotations {
                    self.usages
                        .entry(ann.name.clone())
                        .or_default()
                        .push(AnnotationUsage {
                            instance: ann.clone(),
                            target: AnnotationTarget::Method {
                                class: class.name.clone(),
                                method: method.name.clone(),
                                return_type: method.return_type.clone(),
                            },
                        });
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Every usage of `annotation`, on classes, fields and methods.
    pub fn annotation_usages(&self, annotation: &str) -> &[AnnotationUsage] {
        self.usages
            .get(annotation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn direct_subclasses(&self, name: &str) -> impl Iterator<Item = &String> {
        self.subclasses.get(name).into_iter().flatten()
    }

    pub fn direct_implementors(&self, name: &str) -> impl Iterator<Item = &String> {
        self.implementors.get(name).into_iter().flatten()
    }

    /// Classes in this index carrying `annotation`, directly or through its
    /// repeatable container. Container types are looked up in `composite` since
    /// the annotation type usually lives in a different artifact.
    pub fn classes_annotated_with(
        &self,
        annotation: &str,
        composite: &CompositeIndex,
    ) -> Vec<&ClassInfo> {
        let containers = composite.repeatable_containers(annotation);
        let mut found = BTreeMap::new();

        for usage in self.annotation_usages(annotation) {
            if let AnnotationTarget::Class { class } = &usage.target
                && let Some(info) = self.classes.get(class)
            {
                found.insert(class.as_str(), info);
            }
        }

        for (container, usages) in &self.usages {
            let declared = containers.contains(container);
            for usage in usages {
                let AnnotationTarget::Class { class } = &usage.target else {
                    continue;
                };
                let holds = usage.instance.nested().iter().any(|n| n.name == annotation);
                if (declared || holds)
                    && let Some(info) = self.classes.get(class)
                {
                    found.insert(class.as_str(), info);
                }
            }
        }

        found.into_values().collect()
    }

    /// Container type named by `@Repeatable` on annotation type `annotation`.
    pub fn repeatable_container(&self, annotation: &str) -> Option<&str> {
        let info = self.classes.get(annotation)?;
        info.annotations
            .iter()
            .find(|a| a.name == REPEATABLE)
            .and_then(|a| match a.value("value") {
                Some(AnnotationValue::Class(container)) => Some(container.as_str()),
                _ => None,
            })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&StoredIndex {
            version: INDEX_FORMAT_VERSION,
            classes: self.classes.values().cloned().collect(),
        })
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let stored: StoredIndex = serde_json::from_str(raw)?;
        if stored.version != INDEX_FORMAT_VERSION {
            anyhow::bail!(
                "Unsupported annotation index version {} (expected {INDEX_FORMAT_VERSION})",
                stored.version
            );
        }
        Ok(Self::from_classes(stored.classes))
    }
}
