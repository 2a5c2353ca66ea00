// Bundle materialization.
//
// Fetches the referenced bundle into a content-addressed local directory
// (a PVC in cluster deployments) and computes its ContentVersion hash.
// Git and OCI sources resolve to an HTTP archive URL by the packaging
// pipeline; here we handle http(s), local paths, and pre-mounted
// configmap directories.

use std::path::{Path, PathBuf};

use converge_core::{CoreError, Result};
use sha2::{Digest, Sha256};

/// A materialized bundle on local disk.
#[derive(Debug, Clone)]
pub struct MaterializedBundle {
    pub dir: PathBuf,
    /// sha256 over file names and contents, hex-encoded
    pub content_version: String,
}

/// Fetch `source_ref` into `work_dir/<hash>` and return the bundle.
///
/// Supported refs: `http(s)://...` (a tar.gz archive), `file:///...` or a
/// bare path (copied), `configmap:///...` (an already-mounted directory,
/// used in place).
pub async fn materialize(source_ref: &str, work_dir: &Path) -> Result<MaterializedBundle> {
    let staged = if let Some(url) = source_ref
        .strip_prefix("http://")
        .map(|_| source_ref)
        .or_else(|| source_ref.strip_prefix("https://").map(|_| source_ref))
    {
        fetch_archive(url, work_dir).await?
    } else if let Some(path) = source_ref.strip_prefix("configmap://") {
        // Mounted by the pod spec; nothing to copy
        PathBuf::from(path)
    } else {
        let path = source_ref.strip_prefix("file://").unwrap_or(source_ref);
        copy_tree(Path::new(path), &work_dir.join("staging"))?
    };

    let content_version = hash_tree(&staged)?;
    let final_dir = work_dir.join(&content_version);
    if final_dir.exists() {
        // Same content already materialized; reuse it
        return Ok(MaterializedBundle {
            dir: final_dir,
            content_version,
        });
    }
    if staged.starts_with(work_dir) {
        std::fs::rename(&staged, &final_dir)
            .map_err(|e| CoreError::fatal(format!("failed to place bundle: {e}")))?;
    } else {
        copy_tree(&staged, &final_dir)?;
    }
    Ok(MaterializedBundle {
        dir: final_dir,
        content_version,
    })
}

async fn fetch_archive(url: &str, work_dir: &Path) -> Result<PathBuf> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| CoreError::transient(format!("bundle fetch: {e}")))?
        .error_for_status()
        .map_err(|e| CoreError::transient(format!("bundle fetch: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CoreError::transient(format!("bundle fetch: {e}")))?;

    let staging = work_dir.join("staging");
    std::fs::create_dir_all(&staging)
        .map_err(|e| CoreError::fatal(format!("failed to create staging dir: {e}")))?;
    let archive = flate2::read::GzDecoder::new(&bytes[..]);
    let mut tar = tar::Archive::new(archive);
    tar.unpack(&staging)
        .map_err(|e| CoreError::validation(format!("invalid bundle archive: {e}")))?;
    Ok(staging)
}

fn copy_tree(from: &Path, to: &Path) -> Result<PathBuf> {
    if !from.is_dir() {
        return Err(CoreError::validation(format!(
            "bundle source {} is not a directory",
            from.display()
        )));
    }
    std::fs::create_dir_all(to)
        .map_err(|e| CoreError::fatal(format!("failed to create {}: {e}", to.display())))?;
    for entry in walk_files(from)? {
        let relative = entry
            .strip_prefix(from)
            .map_err(|e| CoreError::fatal(format!("path escape: {e}")))?;
        let target = to.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::fatal(format!("failed to create dirs: {e}")))?;
        }
        std::fs::copy(&entry, &target)
            .map_err(|e| CoreError::fatal(format!("failed to copy bundle file: {e}")))?;
    }
    Ok(to.to_path_buf())
}

/// Deterministic hash over relative paths and file contents.
fn hash_tree(dir: &Path) -> Result<String> {
    let mut files = walk_files(dir)?;
    files.sort();
    let mut hasher = Sha256::new();
    for file in files {
        let relative = file
            .strip_prefix(dir)
            .map_err(|e| CoreError::fatal(format!("path escape: {e}")))?;
        hasher.update(relative.to_string_lossy().as_bytes());
        let contents = std::fs::read(&file)
            .map_err(|e| CoreError::fatal(format!("failed to read {}: {e}", file.display())))?;
        hasher.update(&contents);
    }
    Ok(hex::encode(hasher.finalize())[..16].to_string())
}

fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current)
            .map_err(|e| CoreError::fatal(format!("failed to list {}: {e}", current.display())))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| CoreError::fatal(format!("failed to list bundle: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("arena-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_materialize_local_dir_is_content_addressed() {
        let source = temp_dir("src");
        std::fs::write(source.join("arena.yaml"), "scenarios: []\n").unwrap();
        std::fs::create_dir_all(source.join("scenarios")).unwrap();
        std::fs::write(source.join("scenarios/a.yaml"), "id: a\nturns: []\n").unwrap();

        let work = temp_dir("work");
        let first = materialize(source.to_str().unwrap(), &work).await.unwrap();
        assert_eq!(first.content_version.len(), 16);
        assert!(first.dir.join("scenarios/a.yaml").exists());

        // Same content rematerializes to the same version
        let work2 = temp_dir("work2");
        let second = materialize(source.to_str().unwrap(), &work2).await.unwrap();
        assert_eq!(first.content_version, second.content_version);

        // Changed content changes the version
        std::fs::write(source.join("scenarios/a.yaml"), "id: a2\nturns: []\n").unwrap();
        let third = materialize(source.to_str().unwrap(), &temp_dir("work3"))
            .await
            .unwrap();
        assert_ne!(first.content_version, third.content_version);

        for dir in [source, work, work2] {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[tokio::test]
    async fn test_materialize_rejects_missing_source() {
        let err = materialize("/nonexistent/bundle", &temp_dir("work"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
