//! Workload Packaging
//!
//! Bundles the agent entrypoint and its dependency manifest into a
//! compressed, content-addressed package for upload at launch.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::PackageError;

const COMPRESSION_LEVEL: i32 = 3;
const IMAGE_TAG_LEN: usize = 12;

/// A file carried inside the package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    pub path: String,
    pub contents: String,
}

/// Uncompressed package layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub entrypoint: String,
    pub files: Vec<PackageFile>,
}

/// Compressed package ready for upload
#[derive(Debug, Clone)]
pub struct WorkloadPackage {
    pub entrypoint: String,
    pub compressed: Vec<u8>,
    /// sha256 over the compressed bytes, lowercase hex
    pub digest: String,
}

impl WorkloadPackage {
    /// Read the entrypoint and requirements files and build the package
    pub fn build(entrypoint: &Path, requirements: &Path) -> Result<Self, PackageError> {
        let entry_name = file_name(entrypoint);
        let files = vec![
            PackageFile {
                path: entry_name.clone(),
                contents: read(entrypoint)?,
            },
            PackageFile {
                path: file_name(requirements),
                contents: read(requirements)?,
            },
        ];

        Self::from_manifest(PackageManifest {
            entrypoint: entry_name,
            files,
        })
    }

    pub fn from_manifest(manifest: PackageManifest) -> Result<Self, PackageError> {
        let raw = serde_json::to_vec(&manifest)?;
        let compressed =
            zstd::encode_all(raw.as_slice(), COMPRESSION_LEVEL).map_err(PackageError::Compress)?;
        let digest = hex::encode(Sha256::digest(&compressed));

        Ok(Self {
            entrypoint: manifest.entrypoint,
            compressed,
            digest,
        })
    }

    /// Base64 form used on the wire
    pub fn encoded(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.compressed)
    }

    /// Image tag derived from the digest
    pub fn image_tag(&self) -> &str {
        &self.digest[..IMAGE_TAG_LEN]
    }

    /// Decode a wire package back into its manifest
    pub fn decode(encoded: &str) -> Result<PackageManifest, PackageError> {
        let compressed = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        let raw = zstd::decode_all(compressed.as_slice()).map_err(PackageError::Compress)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn read(path: &Path) -> Result<String, PackageError> {
    std::fs::read_to_string(path).map_err(|source| PackageError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_bundles_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("agent.py");
        let reqs = dir.path().join("requirements.txt");
        std::fs::write(&entry, "print('hi')\n").unwrap();
        std::fs::write(&reqs, "strands-agents\n").unwrap();

        let package = WorkloadPackage::build(&entry, &reqs).unwrap();
        assert_eq!(package.entrypoint, "agent.py");
        assert_eq!(package.digest.len(), 64);
        assert_eq!(package.image_tag().len(), 12);

        let manifest = WorkloadPackage::decode(&package.encoded()).unwrap();
        assert_eq!(manifest.entrypoint, "agent.py");
        let paths: Vec<_> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["agent.py", "requirements.txt"]);
        assert_eq!(manifest.files[1].contents, "strands-agents\n");
    }

    #[test]
    fn test_digest_tracks_content() {
        let manifest = |body: &str| PackageManifest {
            entrypoint: "agent.py".into(),
            files: vec![PackageFile {
                path: "agent.py".into(),
                contents: body.into(),
            }],
        };
        let a = WorkloadPackage::from_manifest(manifest("a")).unwrap();
        let a2 = WorkloadPackage::from_manifest(manifest("a")).unwrap();
        let b = WorkloadPackage::from_manifest(manifest("b")).unwrap();
        assert_eq!(a.digest, a2.digest);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_missing_requirements_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("agent.py");
        std::fs::write(&entry, "").unwrap();

        let err = WorkloadPackage::build(&entry, &dir.path().join("requirements.txt")).unwrap_err();
        match err {
            PackageError::Read { path, .. } => assert!(path.ends_with("requirements.txt")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
