use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use veil_core::write_bytes_atomic;

/// Reference to one captured artifact, addressed relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub relative_path: String,
    pub sha256_hex: String,
}

/// Filesystem store for captured submission evidence, addressed by job id.
/// Artifact hashes land on the job result so the stored bytes can be
/// verified against the row later.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn write_page_html(&self, job_id: &str, content: &str) -> Result<ArtifactRef> {
        self.write_artifact(job_id, "page.html", content.as_bytes())
    }

    pub fn write_screenshot_png(&self, job_id: &str, bytes: &[u8]) -> Result<ArtifactRef> {
        self.write_artifact(job_id, "screenshot.png", bytes)
    }

    fn write_artifact(&self, job_id: &str, file_name: &str, bytes: &[u8]) -> Result<ArtifactRef> {
        let job_component = sanitize_job_component(job_id)?;
        let relative_path = format!("{job_component}/{file_name}");
        let path = self.root.join(&relative_path);
        write_bytes_atomic(&path, bytes)
            .with_context(|| format!("failed to write artifact {}", path.display()))?;
        Ok(ArtifactRef {
            relative_path,
            sha256_hex: format!("{:x}", Sha256::digest(bytes)),
        })
    }
}

fn sanitize_job_component(job_id: &str) -> Result<String> {
    let sanitized: String = job_id
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
        .collect();
    if sanitized.is_empty() {
        bail!("job id '{job_id}' has no filesystem-safe characters");
    }
    Ok(sanitized)
}
