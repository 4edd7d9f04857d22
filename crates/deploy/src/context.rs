//! Build context packaging.

use std::path::PathBuf;

use anyhow::{Context, Result};
use flate2::{Compression, write::GzEncoder};
use walkdir::{DirEntry, WalkDir};

/// Directory names never sent to the Docker daemon.
const EXCLUDED_DIRS: [&str; 3] = ["target", ".git", "node_modules"];

/// A gzipped tar archive of a source tree, ready for `build_image`.
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
    excluded: Vec<PathBuf>,
    extra_files: Vec<(String, Vec<u8>)>,
}

impl BuildContext {
    /// Create a context rooted at the given source directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: Vec::new(),
            extra_files: Vec::new(),
        }
    }

    /// Exclude a path (relative to the root) from the archive.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    /// Add an in-memory file at the root of the archive, e.g. a generated Dockerfile.
    pub fn file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.extra_files.push((name.into(), content.into()));
        self
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let Ok(relative) = entry.path().strip_prefix(&self.root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        if entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
        {
            return true;
        }
        self.excluded.iter().any(|excluded| relative.starts_with(excluded))
    }

    /// Relative paths of all source files that will be archived, sorted.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            anyhow::bail!("Source directory not found: {}", self.root.display());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry));

        for entry in walker {
            let entry = entry.context("Failed to walk source directory")?;
            if entry.file_type().is_file() {
                let relative = entry
                    .path()
                    .strip_prefix(&self.root)
                    .context("Walked outside of the source directory")?;
                files.push(relative.to_path_buf());
            }
        }

        Ok(files)
    }

    /// Build the gzipped tar archive.
    pub fn archive(&self) -> Result<Vec<u8>> {
        let files = self.files()?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);

        for relative in &files {
            builder
                .append_path_with_name(self.root.join(relative), relative)
                .with_context(|| format!("Failed to add {} to build context", relative.display()))?;
        }

        for (name, content) in &self.extra_files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_slice())
                .with_context(|| format!("Failed to add {name} to build context"))?;
        }

        let encoder = builder
            .into_inner()
            .context("Failed to finish build context archive")?;
        let bytes = encoder
            .finish()
            .context("Failed to compress build context archive")?;

        tracing::debug!(
            root = %self.root.display(),
            files = files.len(),
            extra_files = self.extra_files.len(),
            bytes = bytes.len(),
            "Build context packed"
        );

        Ok(bytes)
    }
}
