use crate::core::errors::BackendError;
use crate::core::state::Panel;
use crate::services::artist::PanelArtist;
use crate::services::backend::GenerationBackend;
use crate::services::executor::Executor;
use crate::services::keys::KeyPool;
use crate::services::observer::{ProgressObserver, Stage};
use crate::utils::image::ImageData;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ImageCall {
    pub panel: u32,
    pub api_key: String,
    pub references: Vec<ImageData>,
}

#[derive(Debug, Default)]
pub struct MockBackend {
    pub script: Mutex<Option<serde_json::Value>>,
    pub analysis: Mutex<Option<serde_json::Value>>,
    pub failing_panels: Mutex<HashSet<u32>>,
    pub failing_lettering: Mutex<HashSet<u32>>,
    pub quota_exhausted: Mutex<bool>,
    pub edit_fails: Mutex<bool>,
    /// Cancel this token once the given panel's image has been produced.
    pub cancel_after: Mutex<Option<(u32, CancellationToken)>>,
    /// Lettering for panel n sleeps (10 - n) * step, so later panels finish first.
    pub reverse_lettering_delay: Mutex<Option<Duration>>,

    pub image_calls: Mutex<Vec<ImageCall>>,
    pub lettering_calls: Mutex<Vec<u32>>,
    pub edit_calls: Mutex<Vec<String>>,
    pub lettering_order: Mutex<Vec<u32>>,
    in_flight_images: AtomicUsize,
    pub max_in_flight_images: AtomicUsize,
    in_flight_lettering: AtomicUsize,
    pub max_in_flight_lettering: AtomicUsize,
}

fn panel_number_in(prompt: &str, marker: &str) -> u32 {
    prompt
        .split(marker)
        .nth(1)
        .and_then(|rest| {
            rest.trim_start()
                .split(|c: char| !c.is_ascii_digit())
                .next()
                .and_then(|n| n.parse().ok())
        })
        .unwrap_or(0)
}

pub fn image_for(panel: u32) -> ImageData {
    ImageData::new("image/png", vec![panel as u8])
}

impl MockBackend {
    pub fn with_panels(n: u32) -> Self {
        let panels: Vec<serde_json::Value> = (1..=n)
            .rev()
            .map(|i| {
                json!({
                    "number": i,
                    "description": format!("scene {}", i),
                    "narration": format!("narration {}", i),
                    "dialogue": [{ "speaker": "Ann", "line": format!("line {}", i) }]
                })
            })
            .collect();
        let backend = Self::default();
        *backend.script.lock().unwrap() = Some(json!({ "panels": panels }));
        backend
    }

    fn track(counter: &AtomicUsize, max: &AtomicUsize) {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate_text(
        &self,
        _api_key: &str,
        prompt: &str,
        images: &[ImageData],
        _schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        if prompt.contains("comic book writer") {
            return self
                .script
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("no script configured"));
        }
        if prompt.contains("story editor") {
            return self
                .analysis
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("no analysis configured"));
        }

        // Lettering: the attached image encodes the panel number.
        let panel = images
            .first()
            .and_then(|i| i.bytes.first().copied())
            .map(u32::from)
            .unwrap_or(0);
        self.lettering_calls.lock().unwrap().push(panel);
        Self::track(&self.in_flight_lettering, &self.max_in_flight_lettering);

        let delay = *self.reverse_lettering_delay.lock().unwrap();
        if let Some(step) = delay {
            tokio::time::sleep(step * 10u32.saturating_sub(panel)).await;
        }
        self.in_flight_lettering.fetch_sub(1, Ordering::SeqCst);
        self.lettering_order.lock().unwrap().push(panel);

        if self.failing_lettering.lock().unwrap().contains(&panel) {
            return Err(anyhow!("lettering model refused panel {}", panel));
        }
        Ok(json!({
            "elements": [{
                "kind": "dialogue",
                "text": format!("text for panel {}", panel),
                "x": 10, "y": 10, "width": 30, "height": 15,
                "tail_x": 20, "tail_y": 40
            }]
        }))
    }

    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        references: &[ImageData],
    ) -> Result<ImageData> {
        let panel = panel_number_in(prompt, "comic panel");
        Self::track(&self.in_flight_images, &self.max_in_flight_images);
        self.image_calls.lock().unwrap().push(ImageCall {
            panel,
            api_key: api_key.to_string(),
            references: references.to_vec(),
        });
        tokio::task::yield_now().await;
        self.in_flight_images.fetch_sub(1, Ordering::SeqCst);

        if *self.quota_exhausted.lock().unwrap() {
            return Err(BackendError::RateLimited("quota".to_string()).into());
        }
        if self.failing_panels.lock().unwrap().contains(&panel) {
            return Err(anyhow!("content policy violation on panel {}", panel));
        }
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *after == panel {
                token.cancel();
            }
        }
        Ok(image_for(panel))
    }

    async fn edit_image(
        &self,
        _api_key: &str,
        image: &ImageData,
        instruction: &str,
    ) -> Result<ImageData> {
        self.edit_calls.lock().unwrap().push(instruction.to_string());
        if *self.edit_fails.lock().unwrap() {
            return Err(anyhow!("edit rejected"));
        }
        // Edited art keeps the panel number byte so lettering can find it.
        let mut bytes = image.bytes.clone();
        bytes.push(0xED);
        Ok(ImageData::new("image/png", bytes))
    }
}

pub fn artist_with(backend: Arc<MockBackend>, keys: usize) -> PanelArtist {
    let keys = (0..keys).map(|i| format!("key{}", i)).collect();
    PanelArtist::new(Executor::new(Arc::new(KeyPool::new(keys))), backend)
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<(Stage, Vec<Panel>)>>,
}

impl RecordingObserver {
    pub fn stages(&self) -> Vec<Stage> {
        self.events.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_panels(&self, stage: Stage, panels: &[Panel]) {
        self.events.lock().unwrap().push((stage, panels.to_vec()));
    }
}
