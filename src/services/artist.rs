use crate::core::config::StyleConfig;
use crate::core::errors::{ComicError, ComicResult};
use crate::core::state::{Character, LetteringElement, Panel, PanelLayout, Scenery};
use crate::services::backend::GenerationBackend;
use crate::services::executor::Executor;
use crate::services::lettering::{lettering_prompt, lettering_schema, parse_lettering};
use crate::services::script::cast_context;
use crate::utils::image::ImageData;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PanelArtist {
    executor: Executor,
    backend: Arc<dyn GenerationBackend>,
}

fn layout_hint(layout: PanelLayout) -> &'static str {
    match layout {
        PanelLayout::Standard => "a standard rectangular panel",
        PanelLayout::Wide => "a wide panoramic panel",
        PanelLayout::Tall => "a tall vertical panel",
        PanelLayout::Splash => "a full-page splash panel",
    }
}

pub fn panel_image_prompt(
    panel: &Panel,
    has_previous: bool,
    characters: &[Character],
    scenery: &[Scenery],
    style: &StyleConfig,
    full_story: &str,
) -> String {
    let continuity = if has_previous {
        "The first attached image is the previous panel: continue its environment, lighting and \
         character positions so the two read as consecutive moments. "
    } else {
        ""
    };
    let sfx = panel
        .sfx
        .as_ref()
        .map(|s| format!("Draw the sound effect \"{}\" ({}) as part of the art. ", s.text, s.style))
        .unwrap_or_default();

    format!(
        "Draw comic panel {} as {}. Art style: {}, {}. Do not draw speech balloons or captions. \
         {}{}Remaining attached images are character and location references.\n\n\
         {}\nStory context: {}\n\nPanel: {}",
        panel.number,
        layout_hint(panel.layout),
        style.art_style,
        if style.color { "full colour" } else { "black and white" },
        continuity,
        sfx,
        cast_context(characters, scenery),
        full_story.chars().take(4000).collect::<String>(),
        panel.description,
    )
}

impl PanelArtist {
    pub fn new(executor: Executor, backend: Arc<dyn GenerationBackend>) -> Self {
        Self { executor, backend }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn backend(&self) -> &dyn GenerationBackend {
        self.backend.as_ref()
    }

    /// Generates the art for `panel`. `previous` (the preceding panel's
    /// image) goes first in the reference list, followed by any
    /// character/scenery reference images.
    pub async fn draw(
        &self,
        panel: &Panel,
        previous: Option<&ImageData>,
        characters: &[Character],
        scenery: &[Scenery],
        style: &StyleConfig,
        full_story: &str,
    ) -> ComicResult<ImageData> {
        let prompt = panel_image_prompt(
            panel,
            previous.is_some(),
            characters,
            scenery,
            style,
            full_story,
        );
        let mut references: Vec<ImageData> = previous.into_iter().cloned().collect();
        references.extend(characters.iter().filter_map(|c| c.reference_image.clone()));
        references.extend(scenery.iter().filter_map(|s| s.reference_image.clone()));

        let backend = self.backend.as_ref();
        let prompt = prompt.as_str();
        let references = references.as_slice();
        self.executor
            .execute(|key| async move { backend.generate_image(&key, prompt, references).await })
            .await
            .map_err(|e| ComicError::PanelGeneration {
                panel: panel.number,
                source: Box::new(e),
            })
    }

    pub async fn letter(
        &self,
        panel: &Panel,
        style: &StyleConfig,
    ) -> ComicResult<Vec<LetteringElement>> {
        let image = panel
            .image
            .as_ref()
            .ok_or(ComicError::MissingImage { panel: panel.number })?;

        let prompt = lettering_prompt(panel, style);
        let schema = lettering_schema();
        let backend = self.backend.as_ref();
        let prompt = prompt.as_str();
        let schema = &schema;
        let images = std::slice::from_ref(image);

        let wrap = |e: ComicError| ComicError::LetteringAnalysis {
            panel: panel.number,
            source: Box::new(e),
        };
        let value = self
            .executor
            .execute(|key| async move { backend.generate_text(&key, prompt, images, schema).await })
            .await
            .map_err(wrap)?;
        parse_lettering(panel.number, value).map_err(|e| wrap(ComicError::Backend(e)))
    }

    pub async fn edit(&self, image: &ImageData, instruction: &str) -> ComicResult<ImageData> {
        let backend = self.backend.as_ref();
        self.executor
            .execute(|key| async move { backend.edit_image(&key, image, instruction).await })
            .await
    }
}
