//! Collecting build outputs and storing them as result artifacts.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use common::entity::{ArtifactSource, NewResultArtifact, SubmissionId};
use common::storage::{BlobKey, BlobStore, StorageError};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::BuildConfig;

pub const STDOUT_FILE: &str = "stdout.txt";
pub const STDERR_FILE: &str = "stderr.txt";

/// A file on disk about to become a result artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFile {
    pub source: ArtifactSource,
    /// Relative to the build root, `/`-separated.
    pub path: String,
    pub file: PathBuf,
}

fn relative(build_root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(build_root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn junit_reports(build_root: &Path, junit_dir: &str) -> Vec<CollectedFile> {
    let dir = build_root.join(junit_dir);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        debug!(dir = %dir.display(), "No JUnit report directory");
        return Vec::new();
    };

    let mut found: Vec<CollectedFile> = entries
        .filter_map(Result::ok)
        // file_type() does not follow symlinks
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with("TEST-") && name.ends_with(".xml")
        })
        .filter_map(|e| {
            let file = e.path();
            Some(CollectedFile {
                source: ArtifactSource::Junit,
                path: relative(build_root, &file)?,
                file,
            })
        })
        .collect();
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

fn report_tree(build_root: &Path, dir: &str, source: ArtifactSource) -> Vec<CollectedFile> {
    let root = build_root.join(dir);
    if !root.is_dir() {
        return Vec::new();
    }

    WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable report entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            Some(CollectedFile {
                source,
                path: relative(build_root, e.path())?,
                file: e.into_path(),
            })
        })
        .collect()
}

/// Everything a finished build left behind: the stdout/stderr pair from
/// `output_dir`, JUnit reports directly inside the report directory, and
/// every regular file below the coverage and mutation report trees.
pub fn collect_files(build_root: &Path, output_dir: &Path, config: &BuildConfig) -> Vec<CollectedFile> {
    let mut files = Vec::new();

    for (source, name) in [
        (ArtifactSource::Stdout, STDOUT_FILE),
        (ArtifactSource::Stderr, STDERR_FILE),
    ] {
        let file = output_dir.join(name);
        if file.is_file() {
            files.push(CollectedFile {
                source,
                path: name.to_string(),
                file,
            });
        }
    }

    files.extend(junit_reports(build_root, &config.junit_dir));
    for dir in &config.coverage_dirs {
        files.extend(report_tree(build_root, dir, ArtifactSource::Coverage));
    }
    for dir in &config.mutation_dirs {
        files.extend(report_tree(build_root, dir, ArtifactSource::Mutation));
    }
    files
}

pub fn mime_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

async fn store_file(
    blobs: &dyn BlobStore,
    submission_id: SubmissionId,
    collected: &CollectedFile,
    compress_threshold: u64,
) -> Result<NewResultArtifact, StorageError> {
    let data = tokio::fs::read(&collected.file).await?;
    let size = data.len() as u64;
    let compressed = size > compress_threshold;

    let file_name = collected
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| collected.source.to_string());
    let file_name = if compressed {
        format!("{file_name}.gz")
    } else {
        file_name
    };

    let blob = BlobKey::generate(&format!("artifacts/{submission_id}"), &file_name)?;
    if compressed {
        blobs.put(&blob, &compress(&data)?).await?;
    } else {
        blobs.put(&blob, &data).await?;
    }

    Ok(NewResultArtifact {
        source: collected.source,
        mime_type: mime_type(&collected.path),
        path: collected.path.clone(),
        compressed,
        blob,
        size,
    })
}

/// Upload collected files. On failure, blobs uploaded so far are removed again.
pub async fn store_files(
    blobs: &dyn BlobStore,
    submission_id: SubmissionId,
    files: &[CollectedFile],
    compress_threshold: u64,
) -> Result<Vec<NewResultArtifact>, StorageError> {
    let mut stored = Vec::with_capacity(files.len());
    for collected in files {
        match store_file(blobs, submission_id, collected, compress_threshold).await {
            Ok(artifact) => stored.push(artifact),
            Err(e) => {
                let keys: Vec<BlobKey> = stored.iter().map(|a| a.blob.clone()).collect();
                discard(blobs, &keys).await;
                return Err(e);
            }
        }
    }
    Ok(stored)
}

/// Best-effort blob removal; failures are logged.
pub async fn discard(blobs: &dyn BlobStore, keys: &[BlobKey]) {
    for key in keys {
        if let Err(e) = blobs.delete(key).await {
            warn!(blob = %key, error = %e, "Failed to delete blob");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::filesystem::FilesystemBlobStore;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn layout() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("src/project");
        let out = dir.path().join("out");
        write(&out.join(STDOUT_FILE), "[INFO] BUILD SUCCESS");
        write(&out.join(STDERR_FILE), "");
        write(&root.join("target/surefire-reports/TEST-com.example.AppTest.xml"), "<testsuite/>");
        write(&root.join("target/surefire-reports/com.example.AppTest.txt"), "summary");
        write(&root.join("target/surefire-reports/nested/TEST-Deep.xml"), "<testsuite/>");
        write(&root.join("target/site/jacoco/index.html"), "<html/>");
        write(&root.join("target/site/jacoco/com.example/App.html"), "<html/>");
        write(&root.join("target/pit-reports/mutations.xml"), "<mutations/>");
        (dir, root, out)
    }

    #[test]
    fn collects_outputs_and_reports() {
        let (_dir, root, out) = layout();
        let files = collect_files(&root, &out, &BuildConfig::default());

        let found: Vec<_> = files.iter().map(|f| (f.source, f.path.as_str())).collect();
        assert_eq!(
            found,
            vec![
                (ArtifactSource::Stdout, "stdout.txt"),
                (ArtifactSource::Stderr, "stderr.txt"),
                (ArtifactSource::Junit, "target/surefire-reports/TEST-com.example.AppTest.xml"),
                (ArtifactSource::Coverage, "target/site/jacoco/com.example/App.html"),
                (ArtifactSource::Coverage, "target/site/jacoco/index.html"),
                (ArtifactSource::Mutation, "target/pit-reports/mutations.xml"),
            ]
        );
    }

    #[test]
    fn nothing_to_collect() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_files(dir.path(), dir.path(), &BuildConfig::default()).is_empty());
    }

    #[test]
    fn guesses_mime_types() {
        assert_eq!(mime_type("stdout.txt"), "text/plain");
        assert_eq!(mime_type("target/site/jacoco/index.html"), "text/html");
        assert_eq!(mime_type("target/pit-reports/blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn large_files_are_stored_compressed() {
        let (dir, root, out) = layout();
        write(&out.join(STDOUT_FILE), &"[INFO] line\n".repeat(100));
        let blobs = FilesystemBlobStore::new(dir.path().join("blobs"), 1 << 20)
            .await
            .unwrap();

        let files = collect_files(&root, &out, &BuildConfig::default());
        let stored = store_files(&blobs, SubmissionId(7), &files, 64).await.unwrap();

        let stdout = &stored[0];
        assert!(stdout.compressed);
        assert_eq!(stdout.size, 1200);
        assert_eq!(stdout.mime_type, "text/plain");
        assert!(stdout.blob.as_str().starts_with("artifacts/7/"));
        assert!(stdout.blob.as_str().ends_with("stdout.txt.gz"));

        let raw = blobs.get(&stdout.blob).await.unwrap();
        assert_eq!(decompress(&raw).unwrap(), "[INFO] line\n".repeat(100).into_bytes());

        let stderr = &stored[1];
        assert!(!stderr.compressed);
        assert_eq!(blobs.get(&stderr.blob).await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn failed_upload_discards_earlier_blobs() {
        let (dir, root, out) = layout();
        let blobs = FilesystemBlobStore::new(dir.path().join("blobs"), 1 << 20)
            .await
            .unwrap();

        let mut files = collect_files(&root, &out, &BuildConfig::default());
        files.push(CollectedFile {
            source: ArtifactSource::Coverage,
            path: "target/site/jacoco/gone.html".into(),
            file: root.join("target/site/jacoco/gone.html"),
        });

        assert!(store_files(&blobs, SubmissionId(3), &files, 1 << 20).await.is_err());
        let leftovers = walkdir::WalkDir::new(dir.path().join("blobs"))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(leftovers, 0);
    }
}
