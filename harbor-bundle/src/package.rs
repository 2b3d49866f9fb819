//! Bundle packing, unpacking and content hashing.

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::manifest::{BundleManifest, guess_content_type};
use crate::paths::validate_entry_name;
use crate::BundleError;

pub const MANIFEST_ENTRY: &str = "bundle.toml";

/// An opened bundle with every entry loaded.
#[derive(Debug, Clone)]
pub struct UiBundle {
    pub manifest: BundleManifest,
    /// Asset files by relative path, `bundle.toml` excluded.
    pub files: BTreeMap<String, Vec<u8>>,
    manifest_bytes: Vec<u8>,
}

impl UiBundle {
    /// Opens and validates a bundle from a reader.
    pub fn open<R: Read + Seek>(reader: R) -> Result<Self, BundleError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut manifest_bytes = None;
        let mut files = BTreeMap::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            validate_entry_name(&name)?;

            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            if name == MANIFEST_ENTRY {
                manifest_bytes = Some(data);
            } else {
                files.insert(name, data);
            }
        }

        let manifest_bytes =
            manifest_bytes.ok_or_else(|| BundleError::MissingEntry(MANIFEST_ENTRY.into()))?;
        let manifest: BundleManifest = toml::from_str(
            std::str::from_utf8(&manifest_bytes)
                .map_err(|e| BundleError::ManifestInvalid(e.to_string()))?,
        )?;
        validate_entry_name(&manifest.index)
            .map_err(|_| BundleError::ManifestInvalid(format!("bad index '{}'", manifest.index)))?;

        Ok(Self {
            manifest,
            files,
            manifest_bytes,
        })
    }

    /// Opens a bundle from an in-memory archive.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BundleError> {
        Self::open(std::io::Cursor::new(bytes))
    }

    /// Deterministic SHA-256 over all entries, sorted by name.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let manifest = std::iter::once((MANIFEST_ENTRY, self.manifest_bytes.as_slice()));
        let mut entries: Vec<(&str, &[u8])> = self
            .files
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
            .chain(manifest)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (name, data) in entries {
            hasher.update(name.as_bytes());
            hasher.update((data.len() as u64).to_le_bytes());
            hasher.update(data);
        }

        hex::encode(hasher.finalize())
    }

    /// Writes every asset file under `dir`, creating parent directories.
    pub fn unpack_to(&self, dir: &Path) -> Result<(), BundleError> {
        std::fs::create_dir_all(dir)?;
        for (name, data) in &self.files {
            let target = dir.join(name);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, data)?;
        }
        Ok(())
    }

    pub fn has_index(&self) -> bool {
        self.files.contains_key(&self.manifest.index)
    }
}

/// Fluent builder for creating bundles.
pub struct BundleBuilder {
    manifest: BundleManifest,
    files: BTreeMap<String, Vec<u8>>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self {
            manifest: BundleManifest::default(),
            files: BTreeMap::new(),
        }
    }

    pub fn index(mut self, path: &str) -> Self {
        self.manifest.index = path.to_string();
        self
    }

    pub fn csp(mut self, policy: &str) -> Self {
        self.manifest.csp = Some(policy.to_string());
        self
    }

    /// Adds a file, recording a content type guessed from its extension.
    pub fn add_file(mut self, path: &str, data: Vec<u8>) -> Self {
        if let Some(mime) = guess_content_type(path) {
            self.manifest
                .content_types
                .insert(path.to_string(), mime.to_string());
        }
        self.files.insert(path.to_string(), data);
        self
    }

    /// Adds a file with an explicit content type.
    pub fn add_typed_file(mut self, path: &str, content_type: &str, data: Vec<u8>) -> Self {
        self.manifest
            .content_types
            .insert(path.to_string(), content_type.to_string());
        self.files.insert(path.to_string(), data);
        self
    }

    /// Builds the zip archive and returns the raw bytes.
    pub fn build(self) -> Result<Vec<u8>, BundleError> {
        for name in self.files.keys() {
            validate_entry_name(name)?;
        }

        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let manifest_toml = toml::to_string_pretty(&self.manifest)?;
        zip.start_file(MANIFEST_ENTRY, options)?;
        zip.write_all(manifest_toml.as_bytes())?;

        for (name, data) in &self.files {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(data)?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
