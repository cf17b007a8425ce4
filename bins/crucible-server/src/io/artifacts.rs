// Collection of files the executed program wrote into its `output/`
// directory, returned to the client as base64 with a mime-type guess.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::config::CONTAINER_WORKDIR;
use crate::io::encoding::encode_base64;
use crate::io::workspace::Workspace;
use crate::lifecycle::{ContainerManager, SandboxContainer};
use crucible_common::types::ArtifactFile;

const OUTPUT_DIR: &str = "output";

/// Fetch the container's `output/` tree and package every file. A missing
/// or unreadable directory is not an error: programs are not required to
/// produce artifacts.
pub async fn collect_artifacts(
    manager: &ContainerManager,
    container: &SandboxContainer,
    workspace: &Workspace,
) -> HashMap<String, ArtifactFile> {
    let archive_path = format!("{CONTAINER_WORKDIR}/{OUTPUT_DIR}");
    let bytes = match manager.download_archive(container, &archive_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(container = %container.id, error = %e, "no output directory to collect");
            return HashMap::new();
        }
    };

    let dest = workspace.root().to_path_buf();
    let unpacked = tokio::task::spawn_blocking(move || unpack_and_read(&bytes, &dest)).await;

    match unpacked {
        Ok(Ok(files)) => files
            .into_iter()
            .map(|(name, bytes)| {
                let artifact = ArtifactFile {
                    mime_type: mime_for_name(&name).to_string(),
                    content_b64: encode_base64(&bytes),
                };
                (name, artifact)
            })
            .collect(),
        Ok(Err(e)) => {
            warn!(container = %container.id, error = %e, "failed to unpack artifact archive");
            HashMap::new()
        }
        Err(e) => {
            warn!(container = %container.id, error = %e, "artifact task panicked");
            HashMap::new()
        }
    }
}

/// Unpack the tar stream into the workspace and read back every regular
/// file under `output/`, keyed by its path relative to that directory.
fn unpack_and_read(bytes: &[u8], dest: &Path) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    tar::Archive::new(Cursor::new(bytes))
        .unpack(dest)
        .context("failed to unpack archive")?;

    let output_root = dest.join(OUTPUT_DIR);
    let mut files = Vec::new();
    let mut pending = vec![output_root.clone()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                let rel = relative_name(&output_root, &path);
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                files.push((rel, bytes));
            }
        }
    }
    Ok(files)
}

fn relative_name(root: &PathBuf, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extension-based mime inference, `application/octet-stream` otherwise.
fn mime_for_name(name: &str) -> &'static str {
    let extension = name.rsplit('.').next().unwrap_or_default().to_lowercase();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, bytes) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *bytes).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn unique_dir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "crucible-artifacts-{label}-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn unpack_reads_nested_files() {
        let dest = unique_dir("nested");
        let archive = tar_with(&[
            ("output/plot.png", b"\x89PNG"),
            ("output/data/result.csv", b"a,b\n1,2\n"),
        ]);
        let mut files = unpack_and_read(&archive, &dest).unwrap();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "data/result.csv");
        assert_eq!(files[1].0, "plot.png");
        assert_eq!(files[1].1, b"\x89PNG");
        let _ = std::fs::remove_dir_all(dest);
    }

    #[test]
    fn missing_output_dir_yields_no_files() {
        let dest = unique_dir("empty");
        let archive = tar_with(&[]);
        let files = unpack_and_read(&archive, &dest).unwrap();
        assert!(files.is_empty());
        let _ = std::fs::remove_dir_all(dest);
    }

    #[test]
    fn mime_inference_covers_common_types() {
        assert_eq!(mime_for_name("plot.png"), "image/png");
        assert_eq!(mime_for_name("report.PDF"), "application/pdf");
        assert_eq!(mime_for_name("notes.txt"), "text/plain");
        assert_eq!(mime_for_name("weird.bin"), "application/octet-stream");
        assert_eq!(mime_for_name("noextension"), "application/octet-stream");
    }
}
