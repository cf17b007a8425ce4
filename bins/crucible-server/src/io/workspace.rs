// Per-execution workspace: a throwaway directory laid out on the host and
// bind-mounted into the sandbox container.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use futures_util::future::try_join_all;
use regex::Regex;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CONTAINER_WORKDIR;
use crate::error::EngineError;
use crate::io::encoding::decode_base64;
use crate::sanitize::SourcePolicy;

const SERVICE_DIR: &str = "crucible";

#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutOptions {
    /// File contents arrive base64-encoded and must be decoded first.
    pub decode: bool,
    /// Honor Java `package` declarations when placing files.
    pub java_packages: bool,
    /// Place all files under this workspace subdirectory (e.g. `test`).
    pub subdir: Option<&'static str>,
}

/// An execution's working directory under `<tmp>/crucible/<uuid>/`.
///
/// The workspace owns its directory: dropping the value removes the tree,
/// so an early return or panic in a runner cannot leak files. Runners that
/// finish normally call `remove` to make the cleanup explicit and awaited.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root: PathBuf,
    removed: bool,
}

impl Workspace {
    pub async fn create(base: &Path) -> Result<Self, EngineError> {
        let id = Uuid::new_v4();
        let root = base.join(SERVICE_DIR).join(id.to_string());
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create workspace {}", root.display()))?;
        debug!(workspace = %id, path = %root.display(), "workspace created");
        Ok(Self {
            id,
            root,
            removed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read-write bind of the workspace at the fixed in-container path.
    pub fn bind_mount(&self) -> String {
        format!("{}:{}", self.root.display(), CONTAINER_WORKDIR)
    }

    /// Lay out request files on disk. Contents are optionally decoded and
    /// screened, then written concurrently; the first offending file aborts
    /// the layout (partially written files are reclaimed with the workspace).
    pub async fn populate(
        &self,
        files: &HashMap<String, String>,
        policy: &dyn SourcePolicy,
        opts: LayoutOptions,
    ) -> Result<(), EngineError> {
        let mut writes = Vec::with_capacity(files.len());
        for (name, content) in files {
            let bytes = if opts.decode {
                decode_base64(content)?
            } else {
                content.clone().into_bytes()
            };
            let text = String::from_utf8_lossy(&bytes);
            policy.inspect(name, &text)?;

            let mut rel = if opts.java_packages && name.ends_with(".java") {
                match java_package_path(&text) {
                    Some(pkg) => pkg.join(sanitized_rel_path(name)?),
                    None => sanitized_rel_path(name)?,
                }
            } else {
                sanitized_rel_path(name)?
            };
            if let Some(subdir) = opts.subdir {
                rel = Path::new(subdir).join(rel);
            }

            let target = self.root.join(rel);
            writes.push(async move {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                fs::write(&target, &bytes)
                    .await
                    .with_context(|| format!("failed to write {}", target.display()))?;
                Ok::<_, anyhow::Error>(())
            });
        }
        try_join_all(writes).await?;
        Ok(())
    }

    /// Write one sidecar file (e.g. `input.txt`) into the workspace root.
    pub async fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let target = self.root.join(sanitized_rel_path(name)?);
        fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(())
    }

    /// Read a sidecar file the container produced. Missing files yield `None`.
    pub async fn read_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.root.join(name)).await.ok()
    }

    /// Explicit, awaited removal of the workspace tree.
    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = fs::remove_dir_all(&self.root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workspace = %self.id, error = %e, "failed to remove workspace");
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let root = self.root.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = fs::remove_dir_all(&root).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(workspace = %id, error = %e, "workspace cleanup failed");
                    }
                }
            });
        } else {
            let _ = std::fs::remove_dir_all(&root);
        }
    }
}

/// Validate a request-supplied file name: relative, no parent traversal.
fn sanitized_rel_path(name: &str) -> Result<PathBuf, EngineError> {
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(EngineError::UnsafeSource {
            file: name.to_string(),
            reason: "absolute paths are not allowed".to_string(),
        });
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(EngineError::UnsafeSource {
                    file: name.to_string(),
                    reason: "path escapes the workspace".to_string(),
                })
            }
        }
    }
    Ok(path.to_path_buf())
}

/// Extract the directory path implied by a leading `package x.y.z;`
/// declaration, if any.
pub(crate) fn java_package_path(source: &str) -> Option<PathBuf> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s*package\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*;")
            .expect("package pattern is valid")
    });
    let captures = re.captures(source)?;
    let mut path = PathBuf::new();
    for part in captures[1].split('.') {
        path.push(part);
    }
    Some(path)
}
