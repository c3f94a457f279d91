use crate::core::io::Storage;
use crate::core::state::{Chapter, Panel, ProjectState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn save(&self, project: &ProjectState) -> Result<()>;
}

pub struct JsonProjectStore {
    storage: Arc<dyn Storage>,
    path: String,
}

impl JsonProjectStore {
    pub fn new(storage: Arc<dyn Storage>, build_folder: &str) -> Self {
        let path = Path::new(build_folder)
            .join("project.json")
            .to_string_lossy()
            .to_string();
        Self { storage, path }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<ProjectState>> {
        if !self.storage.exists(&self.path).await? {
            return Ok(None);
        }
        let bytes = self.storage.read(&self.path).await?;
        let content = String::from_utf8(bytes)?;
        let project = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path))?;
        Ok(Some(project))
    }
}

#[async_trait]
impl ProjectStore for JsonProjectStore {
    async fn save(&self, project: &ProjectState) -> Result<()> {
        let content = serde_json::to_string_pretty(project)?;
        self.storage.write(&self.path, content.as_bytes()).await?;
        Ok(())
    }
}

// Earlier panel_* files go first so a shorter rerun leaves nothing stale.
pub async fn export_chapter(
    storage: &dyn Storage,
    output_dir: &Path,
    chapter: &Chapter,
) -> Result<usize> {
    for entry in storage.list_files(&output_dir.to_string_lossy()).await? {
        let is_panel_file = Path::new(&entry)
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("panel_"));
        if is_panel_file {
            debug!("Removing stale {}", entry);
            storage.remove(&entry).await?;
        }
    }

    let mut written = 0;
    for panel in &chapter.panels {
        if let Some(image) = &panel.image {
            let path = output_dir.join(format!("panel_{:02}.{}", panel.number, image.extension()));
            storage.write(&path.to_string_lossy(), &image.bytes).await?;
            written += 1;
        }
        if let Some(lettering) = &panel.lettering {
            let path = output_dir.join(format!("panel_{:02}.lettering.json", panel.number));
            let content = serde_json::to_string_pretty(lettering)?;
            storage.write(&path.to_string_lossy(), content.as_bytes()).await?;
            written += 1;
        }
    }
    Ok(written)
}

/// Saves chapter snapshots on a background task, in submission order.
pub struct ChapterSnapshotter {
    project: ProjectState,
    chapter: usize,
    tx: mpsc::UnboundedSender<ProjectState>,
    writer: JoinHandle<()>,
}

impl ChapterSnapshotter {
    pub fn new(store: Arc<dyn ProjectStore>, project: ProjectState, chapter: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProjectState>();
        let writer = tokio::spawn(async move {
            while let Some(project) = rx.recv().await {
                if let Err(e) = store.save(&project).await {
                    warn!("Failed to persist project: {:#}", e);
                }
            }
        });
        Self {
            project,
            chapter,
            tx,
            writer,
        }
    }

    pub fn snapshot(&self, panels: &[Panel]) {
        let mut project = self.project.clone();
        match project.chapters.get_mut(self.chapter) {
            Some(chapter) => chapter.panels = panels.to_vec(),
            None => {
                warn!("Chapter {} not in project, snapshot skipped", self.chapter);
                return;
            }
        }
        if self.tx.send(project).is_err() {
            warn!("Project writer stopped, snapshot dropped");
        }
    }

    pub async fn flush(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            warn!("Project writer task failed: {}", e);
        }
    }
}
