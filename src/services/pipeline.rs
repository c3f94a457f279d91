use crate::core::config::StyleConfig;
use crate::core::errors::{ComicError, ComicResult};
use crate::core::state::{Character, LetteringElement, Panel, Scenery};
use crate::services::artist::PanelArtist;
use crate::services::observer::{ProgressObserver, Stage};
use crate::services::project::ChapterSnapshotter;
use crate::services::script::{parse_script, script_prompt, script_schema};
use futures_util::StreamExt;
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone, Copy)]
pub struct ChapterRequest<'a> {
    pub chapter_text: &'a str,
    pub characters: &'a [Character],
    pub scenery: &'a [Scenery],
    pub style: &'a StyleConfig,
    pub full_story: &'a str,
}

#[derive(Debug)]
pub struct JobState {
    pub panels: Vec<Panel>,
    pub current: usize,
    pub cancel: CancellationToken,
    pub cancelled: bool,
}

impl JobState {
    pub fn new(panels: Vec<Panel>, cancel: CancellationToken) -> Self {
        Self {
            panels,
            current: 0,
            cancel,
            cancelled: false,
        }
    }
}

pub struct Pipeline {
    artist: PanelArtist,
    observer: Arc<dyn ProgressObserver>,
    snapshots: Option<ChapterSnapshotter>,
}

impl Pipeline {
    pub fn new(artist: PanelArtist, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            artist,
            observer,
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: ChapterSnapshotter) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn into_snapshots(self) -> Option<ChapterSnapshotter> {
        self.snapshots
    }

    fn publish(&self, stage: Stage, panels: &[Panel]) {
        self.observer.on_panels(stage, panels);
        if let Some(snapshots) = &self.snapshots {
            snapshots.snapshot(panels);
        }
    }

    /// Only a script failure is returned as an error; panel and lettering
    /// failures are recorded on the panels. `cancel` is polled before each
    /// panel image.
    pub async fn generate_chapter(
        &self,
        request: &ChapterRequest<'_>,
        cancel: &CancellationToken,
    ) -> ComicResult<Vec<Panel>> {
        let panels = self.write_script(request).await?;
        info!("Script has {} panels", panels.len());
        self.publish(Stage::ScriptReady, &panels);

        let job = self
            .draw_panels(JobState::new(panels, cancel.clone()), request)
            .await;
        if job.cancelled {
            return Ok(job.panels);
        }

        Ok(self.letter_panels(job.panels, request.style).await)
    }

    async fn write_script(&self, request: &ChapterRequest<'_>) -> ComicResult<Vec<Panel>> {
        let prompt = script_prompt(
            request.chapter_text,
            request.characters,
            request.scenery,
            request.style,
            request.full_story,
        );
        let schema = script_schema();
        let backend = self.artist.backend();
        let prompt = prompt.as_str();
        let schema = &schema;

        let value = self
            .artist
            .executor()
            .execute(|key| async move { backend.generate_text(&key, prompt, &[], schema).await })
            .await
            .map_err(|e| match e {
                ComicError::Backend(inner) => {
                    ComicError::ScriptGeneration(format!("{:#}", inner))
                }
                other => other,
            })?;
        parse_script(value)
    }

    async fn draw_panels(&self, mut job: JobState, request: &ChapterRequest<'_>) -> JobState {
        while job.current < job.panels.len() {
            let i = job.current;
            if job.cancel.is_cancelled() {
                info!("Cancelled before panel {}", job.panels[i].number);
                // Lettering will not run for the panels already drawn.
                for panel in &mut job.panels[..i] {
                    panel.is_lettering = false;
                }
                for panel in &mut job.panels[i..] {
                    panel.mark_failed(CANCELLED_REASON);
                }
                job.cancelled = true;
                self.publish(Stage::Cancelled, &job.panels);
                break;
            }

            let previous = i.checked_sub(1).and_then(|p| job.panels[p].image.as_ref());
            let result = self
                .artist
                .draw(
                    &job.panels[i],
                    previous,
                    request.characters,
                    request.scenery,
                    request.style,
                    request.full_story,
                )
                .await;

            let panel = &mut job.panels[i];
            match result {
                Ok(image) => {
                    panel.image = Some(image);
                    panel.is_generating = false;
                    panel.is_lettering = true;
                }
                Err(e) => {
                    warn!("{}", e);
                    panel.image = None;
                    panel.mark_failed(e.user_message());
                }
            }
            self.publish(Stage::PanelImage { index: i }, &job.panels);
            job.current += 1;
        }
        job
    }

    async fn letter_panels(&self, mut panels: Vec<Panel>, style: &StyleConfig) -> Vec<Panel> {
        let jobs: Vec<usize> = panels
            .iter()
            .enumerate()
            .filter(|(_, p)| p.can_letter())
            .map(|(i, _)| i)
            .collect();
        if jobs.is_empty() {
            return panels;
        }

        let artist = &self.artist;
        let drawn = &panels;
        let results: Vec<(usize, ComicResult<Vec<LetteringElement>>)> =
            futures_util::stream::iter(jobs.iter().copied())
                .map(|i| async move { (i, artist.letter(&drawn[i], style).await) })
                .buffer_unordered(jobs.len())
                .collect()
                .await;

        // Results arrive in completion order; write back by index.
        for (i, result) in results {
            let panel = &mut panels[i];
            panel.is_lettering = false;
            match result {
                Ok(elements) => panel.lettering = Some(elements),
                Err(e) => warn!("{}", e),
            }
        }
        self.publish(Stage::LetteringMerged, &panels);
        panels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::{Chapter, PanelPhase, ProjectState};
    use crate::services::mock::{artist_with, image_for, MockBackend, RecordingObserver};
    use crate::services::project::JsonProjectStore;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn request<'a>(style: &'a StyleConfig) -> ChapterRequest<'a> {
        ChapterRequest {
            chapter_text: "The hero enters the castle.",
            characters: &[],
            scenery: &[],
            style,
            full_story: "The hero enters the castle. Then leaves.",
        }
    }

    fn pipeline(backend: Arc<MockBackend>) -> (Pipeline, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = Pipeline::new(artist_with(backend, 2), observer.clone());
        (pipeline, observer)
    }

    #[tokio::test]
    async fn test_full_run_draws_in_order_with_continuity() {
        let backend = Arc::new(MockBackend::with_panels(3));
        let (pipeline, observer) = pipeline(backend.clone());
        let style = StyleConfig::default();

        let panels = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await
            .unwrap();

        // Script came back reversed; panels are ordered by number.
        assert_eq!(
            panels.iter().map(|p| p.description.as_str()).collect::<Vec<_>>(),
            vec!["scene 1", "scene 2", "scene 3"]
        );

        let calls = backend.image_calls.lock().unwrap().clone();
        assert_eq!(calls.iter().map(|c| c.panel).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(calls[0].references.is_empty());
        assert_eq!(calls[1].references[0], image_for(1));
        assert_eq!(calls[2].references[0], image_for(2));
        assert_eq!(backend.max_in_flight_images.load(Ordering::SeqCst), 1);

        for panel in &panels {
            assert_eq!(panel.phase(), PanelPhase::Complete);
            assert!(!panel.is_lettering);
            assert!(!panel.is_generating);
        }

        let stages = observer.stages();
        assert_eq!(stages.first(), Some(&Stage::ScriptReady));
        assert_eq!(stages.last(), Some(&Stage::LetteringMerged));
        assert_eq!(stages.len(), 5);
    }

    #[tokio::test]
    async fn test_cancel_after_first_panel_skips_rest_and_lettering() {
        let backend = Arc::new(MockBackend::with_panels(3));
        let cancel = CancellationToken::new();
        *backend.cancel_after.lock().unwrap() = Some((1, cancel.clone()));
        let (pipeline, observer) = pipeline(backend.clone());
        let style = StyleConfig::default();

        let panels = pipeline.generate_chapter(&request(&style), &cancel).await.unwrap();

        assert_eq!(panels[0].image, Some(image_for(1)));
        assert!(!panels[0].generation_failed);
        assert!(!panels[0].is_lettering);
        assert_eq!(panels[0].phase(), PanelPhase::ImageReady);
        for panel in &panels[1..] {
            assert!(panel.generation_failed);
            assert_eq!(panel.failure_reason.as_deref(), Some(CANCELLED_REASON));
            assert!(panel.image.is_none());
        }

        assert_eq!(backend.image_calls.lock().unwrap().len(), 1);
        assert!(backend.lettering_calls.lock().unwrap().is_empty());
        assert!(panels.iter().all(|p| p.lettering.is_none()));
        assert!(!observer.stages().contains(&Stage::LetteringMerged));
        assert_eq!(observer.stages().last(), Some(&Stage::Cancelled));
    }

    #[tokio::test]
    async fn test_lettering_merge_ignores_completion_order() {
        let backend = Arc::new(MockBackend::with_panels(3));
        *backend.reverse_lettering_delay.lock().unwrap() = Some(Duration::from_millis(15));
        let (pipeline, _) = pipeline(backend.clone());
        let style = StyleConfig::default();

        let panels = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*backend.lettering_order.lock().unwrap(), vec![3, 2, 1]);
        assert_eq!(backend.max_in_flight_lettering.load(Ordering::SeqCst), 3);
        for panel in &panels {
            let lettering = panel.lettering.as_ref().unwrap();
            assert_eq!(lettering[0].text, format!("text for panel {}", panel.number));
        }
    }

    #[tokio::test]
    async fn test_failed_panel_is_isolated() {
        let backend = Arc::new(MockBackend::with_panels(3));
        backend.failing_panels.lock().unwrap().insert(2);
        let (pipeline, _) = pipeline(backend.clone());
        let style = StyleConfig::default();

        let panels = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await
            .unwrap();

        assert!(panels[1].generation_failed);
        assert!(panels[1].image.is_none());
        assert!(panels[1].lettering.is_none());
        assert!(panels[1]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("content policy"));

        // Panel 3 ran without a continuity reference since panel 2 has no art.
        let calls = backend.image_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].references.is_empty());

        assert!(panels[0].lettering.is_some());
        assert!(panels[2].lettering.is_some());
        assert_eq!(*backend.lettering_calls.lock().unwrap().iter().max().unwrap(), 3);
        assert!(!backend.lettering_calls.lock().unwrap().contains(&2));
    }

    #[tokio::test]
    async fn test_quota_exhaustion_gets_distinct_reason() {
        let backend = Arc::new(MockBackend::with_panels(1));
        *backend.quota_exhausted.lock().unwrap() = true;
        let (pipeline, _) = pipeline(backend.clone());
        let style = StyleConfig::default();

        let panels = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await
            .unwrap();

        // Two keys in the pool, both tried once.
        let calls = backend.image_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].api_key, calls[1].api_key);
        assert!(panels[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("exhausted their quota"));
    }

    #[tokio::test]
    async fn test_lettering_failure_is_isolated() {
        let backend = Arc::new(MockBackend::with_panels(3));
        backend.failing_lettering.lock().unwrap().insert(1);
        let (pipeline, _) = pipeline(backend.clone());
        let style = StyleConfig::default();

        let panels = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await
            .unwrap();

        assert!(panels[0].lettering.is_none());
        assert!(!panels[0].is_lettering);
        assert!(!panels[0].generation_failed);
        assert!(panels[1].lettering.is_some());
        assert!(panels[2].lettering.is_some());
    }

    #[tokio::test]
    async fn test_empty_script_aborts_chapter() {
        let backend = Arc::new(MockBackend::default());
        *backend.script.lock().unwrap() = Some(serde_json::json!({ "panels": [] }));
        let (pipeline, observer) = pipeline(backend.clone());
        let style = StyleConfig::default();

        let err = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ComicError::ScriptGeneration(_)));
        assert!(observer.stages().is_empty());
        assert!(backend.image_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_in_script_stage_is_script_error() {
        let backend = Arc::new(MockBackend::default());
        let (pipeline, _) = pipeline(backend);
        let style = StyleConfig::default();

        let err = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ComicError::ScriptGeneration(_)));
    }

    #[tokio::test]
    async fn test_progress_is_snapshotted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(JsonProjectStore::new(
            Arc::new(NativeStorage::new()),
            &dir.path().to_string_lossy(),
        ));
        let project = ProjectState {
            chapters: vec![Chapter {
                title: "One".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let backend = Arc::new(MockBackend::with_panels(2));
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = Pipeline::new(artist_with(backend, 1), observer)
            .with_snapshots(ChapterSnapshotter::new(store.clone(), project, 0));
        let style = StyleConfig::default();

        let panels = pipeline
            .generate_chapter(&request(&style), &CancellationToken::new())
            .await?;
        if let Some(snapshots) = pipeline.into_snapshots() {
            snapshots.flush().await;
        }

        let saved = store.load().await?.expect("snapshot written");
        assert_eq!(saved.chapters[0].panels, panels);
        Ok(())
    }
}
