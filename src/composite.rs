//! Whole-graph view over every per-artifact index merged so far.
//!
//! Members are keyed by origin (the owning coordinate), so merging the same
//! index twice is a no-op and query results never depend on merge order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use crate::index::{AnnotationIndex, ClassInfo};

#[derive(Debug, Clone, Default)]
pub struct CompositeIndex {
    members: BTreeMap<String, Arc<AnnotationIndex>>,
}

impl CompositeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `index` under `origin`. Returns `false` if that origin was already merged.
    pub fn expand(&mut self, origin: &str, index: Arc<AnnotationIndex>) -> bool {
        if self.members.contains_key(origin) {
            return false;
        }
        tracing::trace!(origin, classes = index.len(), "Expanding composite index");
        self.members.insert(origin.to_string(), index);
        true
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn class_count(&self) -> usize {
        self.members
            .values()
            .flat_map(|m| m.classes().map(|c| c.name.as_str()))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// First definition by origin order; `None` is a soft miss.
    pub fn class_by_name(&self, name: &str) -> Option<&ClassInfo> {
        self.members.values().find_map(|m| m.class_by_name(name))
    }

    /// Containers declared through `@Repeatable` on the annotation type.
    pub fn repeatable_containers(&self, annotation: &str) -> BTreeSet<String> {
        self.members
            .values()
            .filter_map(|m| m.repeatable_container(annotation))
            .map(str::to_string)
            .collect()
    }

    pub fn classes_annotated_with(&self, annotation: &str) -> Vec<&ClassInfo> {
        let mut found: BTreeMap<&str, &ClassInfo> = BTreeMap::new();
        for member in self.members.values() {
            for class in member.classes_annotated_with(annotation, self) {
                found.entry(class.name.as_str()).or_insert(class);
            }
        }
        found.into_values().collect()
    }

    /// All known non-interface types implementing `interface`, following
    /// sub-interfaces and subclasses of implementors.
    pub fn implementors_of(&self, interface: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut seen_interfaces = BTreeSet::new();
        let mut pending = VecDeque::from([interface.to_string()]);

        while let Some(current) = pending.pop_front() {
            if !seen_interfaces.insert(current.clone()) {
                continue;
            }
            for implementor in self.direct_implementors(&current) {
                let is_interface = self
                    .class_by_name(&implementor)
                    .is_some_and(|c| c.flags.interface);
                if is_interface {
                    pending.push_back(implementor);
                } else if result.insert(implementor.clone()) {
                    result.extend(self.all_subclasses(&implementor));
                }
            }
        }

        result
    }

    pub fn all_subclasses(&self, class: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut pending = VecDeque::from([class.to_string()]);
        while let Some(current) = pending.pop_front() {
            for sub in self.direct_subclasses(&current) {
                if result.insert(sub.clone()) {
                    pending.push_back(sub);
                }
            }
        }
        result
    }

    fn direct_implementors(&self, interface: &str) -> BTreeSet<String> {
        self.members
            .values()
            .flat_map(|m| m.direct_implementors(interface).cloned())
            .collect()
    }

    fn direct_subclasses(&self, class: &str) -> BTreeSet<String> {
        self.members
            .values()
            .flat_map(|m| m.direct_subclasses(class).cloned())
            .collect()
    }
}
