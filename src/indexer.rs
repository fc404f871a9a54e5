//! Builds the annotation index of one artifact.
//!
//! Sources are tried in order: an index shipped inside the artifact, the
//! index store, then a scan of every class entry. A scanned index is written
//! back to the store. Directory artifacts are always scanned since their
//! fingerprint does not track nested files.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::artifact::{ArtifactSource, ArtifactTree, class_entry_to_name};
use crate::classfile::read_class;
use crate::index::AnnotationIndex;
use crate::store::{IndexStore, fingerprint};

pub const EMBEDDED_INDEX_PATH: &str = "META-INF/annotation-index.json";

#[derive(Clone)]
pub struct ArtifactIndexer {
    source: Arc<dyn ArtifactSource>,
    store: Arc<dyn IndexStore>,
}

impl ArtifactIndexer {
    pub fn new(source: Arc<dyn ArtifactSource>, store: Arc<dyn IndexStore>) -> Self {
        Self { source, store }
    }

    pub fn source(&self) -> &Arc<dyn ArtifactSource> {
        &self.source
    }

    /// Never fails: an unreadable artifact yields an empty index.
    pub fn index(&self, coordinate: &str, base: &Path) -> AnnotationIndex {
        match self.try_index(coordinate, base) {
            Ok(index) => index,
            Err(e) => {
                let error = format!("{e:#}");
                tracing::debug!(coordinate, %error, "Indexing failed; using empty index");
                AnnotationIndex::empty()
            }
        }
    }

    pub fn try_index(&self, coordinate: &str, base: &Path) -> Result<AnnotationIndex> {
        let mut tree = self
            .source
            .open(base)
            .with_context(|| format!("Failed to open artifact {coordinate}"))?;

        if let Some(raw) = tree.read(EMBEDDED_INDEX_PATH)? {
            let raw = String::from_utf8_lossy(&raw);
            match AnnotationIndex::from_json(&raw) {
                Ok(index) => {
                    tracing::trace!(coordinate, classes = index.len(), "Using embedded index");
                    return Ok(index);
                }
                Err(e) => tracing::debug!(coordinate, error = %e, "Ignoring unreadable embedded index"),
            }
        }

        let fp = if base.is_file() {
            fingerprint(base).ok()
        } else {
            None
        };

        if let Some(fp) = fp.as_deref() {
            match self.store.load(coordinate, fp) {
                Ok(Some(index)) => {
                    tracing::trace!(coordinate, classes = index.len(), "Using stored index");
                    return Ok(index);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(coordinate, error = %e, "Index store read failed"),
            }
        }

        let index = scan_classes(coordinate, tree.as_mut())?;
        tracing::trace!(coordinate, classes = index.len(), "Generated index");

        if let Some(fp) = fp.as_deref()
            && let Err(e) = self.store.store(coordinate, fp, &index)
        {
            tracing::debug!(coordinate, error = %e, "Index store write failed");
        }
        Ok(index)
    }
}

fn scan_classes(coordinate: &str, tree: &mut dyn ArtifactTree) -> Result<AnnotationIndex> {
    let mut classes = Vec::new();
    for entry in tree.class_entries()? {
        let bytes = match tree.read(&entry) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(e) => {
                let error = format!("{e:#}");
                tracing::debug!(coordinate, %entry, %error, "Skipping unreadable entry");
                continue;
            }
        };
        match read_class(&bytes) {
            Ok(info) => classes.push(info),
            Err(e) => tracing::debug!(
                coordinate,
                class = %class_entry_to_name(&entry),
                error = %e,
                "Skipping unreadable class file"
            ),
        }
    }
    Ok(AnnotationIndex::from_classes(classes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{FsArtifactSource, MemoryArtifactSource, MemoryTree};
    use crate::classfile::fixture::encode_class;
    use crate::index::{AnnotationInstance, ClassInfo};
    use crate::store::{MemoryIndexStore, NoIndexStore};
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zip::write::FileOptions;

    const ENTITY: &str = "javax.persistence.Entity";

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "extension_finder_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, options)?;
            zip.write_all(content)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn entity(name: &str) -> ClassInfo {
        ClassInfo::new(name).annotated(AnnotationInstance::new(ENTITY))
    }

    #[test]
    fn scans_class_entries_and_skips_garbage() {
        let mut source = MemoryArtifactSource::new();
        source.insert(
            "mem:lib",
            MemoryTree::new()
                .with_entry("app/Foo.class", encode_class(&entity("app.Foo")))
                .with_entry("app/Broken.class", b"nope".to_vec()),
        );
        let indexer = ArtifactIndexer::new(Arc::new(source), Arc::new(NoIndexStore));

        let index = indexer.index("g:lib:1", Path::new("mem:lib"));
        assert_eq!(index.len(), 1);
        assert!(index.contains("app.Foo"));
    }

    /// Fails to read one named entry.
    struct FailingSource {
        inner: MemoryTree,
        failing: &'static str,
    }

    struct FailingTree {
        inner: MemoryTree,
        failing: &'static str,
    }

    impl ArtifactSource for FailingSource {
        fn open(&self, _location: &Path) -> Result<Box<dyn ArtifactTree>> {
            Ok(Box::new(FailingTree {
                inner: self.inner.clone(),
                failing: self.failing,
            }))
        }
    }

    impl ArtifactTree for FailingTree {
        fn has_path(&mut self, path: &str) -> bool {
            self.inner.has_path(path)
        }

        fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
            if path == self.failing {
                anyhow::bail!("corrupt entry {path}");
            }
            self.inner.read(path)
        }

        fn class_entries(&mut self) -> Result<Vec<String>> {
            self.inner.class_entries()
        }
    }

    #[test]
    fn unreadable_entry_keeps_healthy_classes() -> Result<()> {
        let source = FailingSource {
            inner: MemoryTree::new()
                .with_entry("app/Bad.class", encode_class(&entity("app.Bad")))
                .with_entry("app/Good.class", encode_class(&entity("app.Good"))),
            failing: "app/Bad.class",
        };
        let indexer = ArtifactIndexer::new(Arc::new(source), Arc::new(NoIndexStore));

        let index = indexer.try_index("g:lib:1", Path::new("mem:lib"))?;
        assert!(index.contains("app.Good"));
        assert!(!index.contains("app.Bad"));
        Ok(())
    }

    #[test]
    fn embedded_index_wins_over_scanning() {
        let embedded = AnnotationIndex::from_classes([entity("app.FromIndex")]);
        let mut source = MemoryArtifactSource::new();
        source.insert(
            "mem:lib",
            MemoryTree::new()
                .with_entry(EMBEDDED_INDEX_PATH, embedded.to_json().unwrap())
                .with_entry("app/Foo.class", encode_class(&entity("app.Foo"))),
        );
        let indexer = ArtifactIndexer::new(Arc::new(source), Arc::new(NoIndexStore));

        let index = indexer.index("g:lib:1", Path::new("mem:lib"));
        assert_eq!(index, embedded);
    }

    #[test]
    fn unopenable_artifact_yields_empty_index() {
        let indexer =
            ArtifactIndexer::new(Arc::new(MemoryArtifactSource::new()), Arc::new(NoIndexStore));
        assert!(indexer.index("g:gone:1", Path::new("mem:gone")).is_empty());
        assert!(indexer.try_index("g:gone:1", Path::new("mem:gone")).is_err());
    }

    #[test]
    fn generated_jar_index_is_persisted_and_reused() -> Result<()> {
        let jar = temp_path("lib.jar");
        write_jar(&jar, &[("app/Foo.class", encode_class(&entity("app.Foo")))])?;
        let store = Arc::new(MemoryIndexStore::new());
        let indexer = ArtifactIndexer::new(Arc::new(FsArtifactSource), store.clone());

        let first = indexer.try_index("g:lib:1", &jar)?;
        assert_eq!(store.len(), 1);
        let fp = fingerprint(&jar)?;
        assert_eq!(store.load("g:lib:1", &fp)?, Some(first.clone()));

        // a stored entry is served without rescanning
        let planted = AnnotationIndex::from_classes([entity("app.Planted")]);
        store.store("g:lib:1", &fp, &planted)?;
        assert_eq!(indexer.try_index("g:lib:1", &jar)?, planted);

        std::fs::remove_file(jar)?;
        Ok(())
    }
}
