use crate::core::config::StyleConfig;
use crate::core::errors::{ComicError, ComicResult};
use crate::core::state::{Character, Panel, Scenery};
use crate::services::artist::PanelArtist;
use crate::utils::image::ImageData;
use log::{info, warn};

/// Redraws one panel and re-letters it. A failed redraw leaves the panel
/// failed with no image, as in a chapter run.
pub async fn regenerate_panel(
    artist: &PanelArtist,
    mut panel: Panel,
    preceding_image: Option<&ImageData>,
    characters: &[Character],
    scenery: &[Scenery],
    style: &StyleConfig,
    full_story: &str,
) -> Panel {
    panel.reset_for_generation();
    info!("Regenerating panel {}", panel.number);

    match artist
        .draw(&panel, preceding_image, characters, scenery, style, full_story)
        .await
    {
        Ok(image) => {
            panel.image = Some(image);
            panel.is_generating = false;
            panel.is_lettering = true;
        }
        Err(e) => {
            warn!("{}", e);
            panel.image = None;
            panel.mark_failed(e.user_message());
            return panel;
        }
    }

    match artist.letter(&panel, style).await {
        Ok(elements) => panel.lettering = Some(elements),
        Err(e) => warn!("{}", e),
    }
    panel.is_lettering = false;
    panel
}

pub async fn edit_image(
    artist: &PanelArtist,
    existing: &ImageData,
    instruction: &str,
) -> ComicResult<ImageData> {
    artist.edit(existing, &edit_prompt(instruction)).await
}

fn edit_prompt(instruction: &str) -> String {
    format!(
        "Apply only this change to the comic panel and keep everything else (composition, \
         characters, colours, style) exactly as it is: {}",
        instruction.trim()
    )
}

pub async fn edit_panel_image(
    artist: &PanelArtist,
    panel: &Panel,
    instruction: &str,
    style: &StyleConfig,
) -> ComicResult<Panel> {
    let existing = panel
        .image
        .as_ref()
        .ok_or(ComicError::MissingImage { panel: panel.number })?;
    let image = edit_image(artist, existing, instruction).await?;

    let mut edited = panel.clone();
    edited.image = Some(image);
    edited.lettering = None;
    edited.generation_failed = false;
    edited.failure_reason = None;
    edited.is_generating = false;

    // The edit may have moved what the old balloons pointed at.
    edited.is_lettering = true;
    match artist.letter(&edited, style).await {
        Ok(elements) => edited.lettering = Some(elements),
        Err(e) => warn!("{}", e),
    }
    edited.is_lettering = false;
    Ok(edited)
}
