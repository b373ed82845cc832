use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

pub const FRAMES_DIR: &str = "frames";

/// Per-job scratch directory `<root>/<prefix>_<id>` with a `frames/` child.
///
/// The directory is removed exactly once: either through [`Workspace::close`]
/// or, failing that, when the value is dropped. Removal errors are logged and
/// swallowed so they never fail a response that has already been produced.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root: PathBuf,
    live: bool,
}

impl Workspace {
    pub async fn create(base: &Path, prefix: &str) -> std::io::Result<Self> {
        let id = Uuid::new_v4();
        let root = base.join(format!("{}_{}", prefix, id));

        // Non-recursive on purpose: an existing directory is a collision, not a reuse.
        fs::create_dir(&root).await?;
        let workspace = Self {
            id,
            root,
            live: true,
        };
        fs::create_dir(workspace.frames_dir()).await?;

        debug!(job_id = %id, path = %workspace.path().display(), "workspace allocated");
        Ok(workspace)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.path().join(FRAMES_DIR)
    }

    pub fn output_path(&self, container: &str) -> PathBuf {
        self.path().join(format!("output.{}", container))
    }

    /// Removes the workspace now and waits for it.
    pub async fn close(mut self) {
        self.live = false;
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(job_id = %self.id, "workspace removed"),
            Err(e) => log_removal_failure(self.id, &self.root, &e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !std::mem::take(&mut self.live) {
            return;
        }
        let root = std::mem::take(&mut self.root);
        let id = self.id;

        let remove = move || match std::fs::remove_dir_all(&root) {
            Ok(()) => debug!(job_id = %id, "workspace removed"),
            Err(e) => log_removal_failure(id, &root, &e),
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

fn log_removal_failure(id: Uuid, root: &Path, e: &std::io::Error) {
    if e.kind() == std::io::ErrorKind::NotFound {
        return;
    }
    warn!(job_id = %id, path = %root.display(), "failed to remove workspace: {}", e);
}
