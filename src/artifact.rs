//! Narrow access to an artifact's contents.
//!
//! An artifact is either an archive (jar) or a directory of compiled output;
//! both are exposed as an [`ArtifactTree`] so that marker probing and class
//! scanning never care which one they are looking at.

use anyhow::{Context, Result, bail};
use ignore::WalkBuilder;
use memmap2::Mmap;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

pub trait ArtifactTree {
    fn has_path(&mut self, path: &str) -> bool;

    fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Relative `/`-separated paths of every `.class` entry.
    fn class_entries(&mut self) -> Result<Vec<String>>;
}

pub trait ArtifactSource: Send + Sync {
    fn open(&self, location: &Path) -> Result<Box<dyn ArtifactTree>>;
}

/// Opens directories as directory trees and everything else as a jar.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactSource;

impl ArtifactSource for FsArtifactSource {
    fn open(&self, location: &Path) -> Result<Box<dyn ArtifactTree>> {
        if location.is_dir() {
            return Ok(Box::new(DirTree::new(location.to_path_buf())));
        }
        Ok(Box::new(JarTree::open(location)?))
    }
}

pub struct JarTree {
    archive: ZipArchive<Cursor<Mmap>>,
}

impl JarTree {
    pub fn open(jar_path: &Path) -> Result<Self> {
        let file = File::open(jar_path)
            .with_context(|| format!("Failed to open jar: {}", jar_path.display()))?;
        // SAFETY: The file is opened read-only; the map is owned by the archive
        // cursor and never outlives this tree.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap jar: {}", jar_path.display()))?;
        let archive = ZipArchive::new(Cursor::new(mmap))
            .with_context(|| format!("Failed to read zip structure: {}", jar_path.display()))?;
        Ok(Self { archive })
    }
}

impl ArtifactTree for JarTree {
    fn has_path(&mut self, path: &str) -> bool {
        self.archive.by_name(path).is_ok()
    }

    fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let mut entry = match self.archive.by_name(path) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    fn class_entries(&mut self) -> Result<Vec<String>> {
        let mut entries = Vec::new();
        for i in 0..self.archive.len() {
            let entry = self.archive.by_index(i)?;
            let name = entry.name();
            if is_class_entry(name) {
                entries.push(name.to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }
}

pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ArtifactTree for DirTree {
    fn has_path(&mut self, path: &str) -> bool {
        self.root.join(path).is_file()
    }

    fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Ok(None);
        }
        let bytes =
            std::fs::read(&full).with_context(|| format!("Failed to read {}", full.display()))?;
        Ok(Some(bytes))
    }

    fn class_entries(&mut self) -> Result<Vec<String>> {
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .build();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if is_class_entry(&relative) {
                entries.push(relative);
            }
        }
        entries.sort();
        Ok(entries)
    }
}

/// Artifact contents held in memory, keyed by entry path.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(path.into(), content.into());
        self
    }
}

impl ArtifactTree for MemoryTree {
    fn has_path(&mut self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(path).cloned())
    }

    fn class_entries(&mut self) -> Result<Vec<String>> {
        Ok(self
            .entries
            .keys()
            .filter(|k| is_class_entry(k))
            .cloned()
            .collect())
    }
}

/// In-memory fixtures addressed by a pseudo location.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactSource {
    trees: HashMap<PathBuf, MemoryTree>,
}

impl MemoryArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<PathBuf>, tree: MemoryTree) {
        self.trees.insert(location.into(), tree);
    }
}

impl ArtifactSource for MemoryArtifactSource {
    fn open(&self, location: &Path) -> Result<Box<dyn ArtifactTree>> {
        match self.trees.get(location) {
            Some(tree) => Ok(Box::new(tree.clone())),
            None => bail!("No in-memory artifact at {}", location.display()),
        }
    }
}

pub fn is_class_entry(name: &str) -> bool {
    name.ends_with(".class") && !name.ends_with("module-info.class")
}

/// `org/example/A$B.class` -> `org.example.A$B`
pub fn class_entry_to_name(entry: &str) -> String {
    entry.trim_end_matches(".class").replace(['/', '\\'], ".")
}
