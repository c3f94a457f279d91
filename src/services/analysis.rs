use crate::core::config::StyleConfig;
use crate::core::errors::{ComicError, ComicResult};
use crate::core::state::{Chapter, Character, Scenery};
use crate::services::artist::PanelArtist;
use crate::utils::image::ImageData;
use futures_util::StreamExt;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct StoryAnalysis {
    pub chapters: Vec<Chapter>,
    pub characters: Vec<Character>,
    pub scenery: Vec<Scenery>,
}

#[derive(Deserialize)]
struct AnalysisResponse {
    chapters: Vec<AnalysisChapter>,
    #[serde(default)]
    characters: Vec<AnalysisEntry>,
    #[serde(default)]
    scenery: Vec<AnalysisEntry>,
}

#[derive(Deserialize)]
struct AnalysisChapter {
    title: String,
    text: String,
}

#[derive(Deserialize)]
struct AnalysisEntry {
    name: String,
    description: String,
}

fn analysis_prompt(story: &str) -> String {
    format!(
        "You are a story editor preparing a novel for comic adaptation. Split the story into \
         chapters (copy each chapter's text verbatim), list every recurring character with a \
         detailed visual description (age, build, hair, clothing) and every recurring location \
         with a visual description.\n\nStory:\n{}",
        story
    )
}

fn analysis_schema() -> serde_json::Value {
    let entry = json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "name": { "type": "STRING" },
                "description": { "type": "STRING" }
            },
            "required": ["name", "description"]
        }
    });
    json!({
        "type": "OBJECT",
        "properties": {
            "chapters": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "text": { "type": "STRING" }
                    },
                    "required": ["title", "text"]
                }
            },
            "characters": entry.clone(),
            "scenery": entry
        },
        "required": ["chapters", "characters", "scenery"]
    })
}

pub fn parse_analysis(value: serde_json::Value) -> ComicResult<StoryAnalysis> {
    let response: AnalysisResponse = serde_json::from_value(value)
        .map_err(|e| ComicError::Analysis(format!("unparsable analysis: {}", e)))?;

    let chapters: Vec<Chapter> = response
        .chapters
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .map(|c| Chapter {
            title: c.title,
            text: c.text,
            panels: Vec::new(),
        })
        .collect();
    if chapters.is_empty() {
        return Err(ComicError::Analysis("no chapters found".to_string()));
    }

    Ok(StoryAnalysis {
        chapters,
        characters: response
            .characters
            .into_iter()
            .map(|c| Character {
                name: c.name,
                description: c.description,
                reference_image: None,
            })
            .collect(),
        scenery: response
            .scenery
            .into_iter()
            .map(|s| Scenery {
                name: s.name,
                description: s.description,
                reference_image: None,
            })
            .collect(),
    })
}

pub async fn analyze_story(artist: &PanelArtist, story: &str) -> ComicResult<StoryAnalysis> {
    let prompt = analysis_prompt(story);
    let schema = analysis_schema();
    let backend = artist.backend();
    let prompt = prompt.as_str();
    let schema = &schema;

    let value = artist
        .executor()
        .execute(|key| async move { backend.generate_text(&key, prompt, &[], schema).await })
        .await?;
    let analysis = parse_analysis(value)?;
    info!(
        "Story analysed: {} chapters, {} characters, {} locations",
        analysis.chapters.len(),
        analysis.characters.len(),
        analysis.scenery.len()
    );
    Ok(analysis)
}

async fn reference_image(
    artist: &PanelArtist,
    kind: &str,
    name: &str,
    description: &str,
    style: &StyleConfig,
) -> ComicResult<ImageData> {
    let prompt = format!(
        "Draw a reference sheet for the {} \"{}\" in this art style: {}, {}. \
         Plain background, no text. {}",
        kind,
        name,
        style.art_style,
        if style.color { "full colour" } else { "black and white" },
        description
    );
    let backend = artist.backend();
    let prompt = prompt.as_str();
    artist
        .executor()
        .execute(|key| async move { backend.generate_image(&key, prompt, &[]).await })
        .await
}

/// Fills in missing reference images. Records that already have one are
/// left alone; a failed record stays without an image.
pub async fn generate_reference_images(
    artist: &PanelArtist,
    characters: &mut [Character],
    scenery: &mut [Scenery],
    style: &StyleConfig,
    concurrency: usize,
) {
    let concurrency = concurrency.max(1);

    let character_jobs: Vec<(usize, String, String)> = characters
        .iter()
        .enumerate()
        .filter(|(_, c)| c.reference_image.is_none())
        .map(|(i, c)| (i, c.name.clone(), c.description.clone()))
        .collect();
    let results: Vec<(usize, ComicResult<ImageData>)> = futures_util::stream::iter(character_jobs)
        .map(|(i, name, description)| async move {
            (i, reference_image(artist, "character", &name, &description, style).await)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    for (i, result) in results {
        match result {
            Ok(image) => characters[i].reference_image = Some(image),
            Err(e) => warn!("Reference image for {} failed: {}", characters[i].name, e),
        }
    }

    let scenery_jobs: Vec<(usize, String, String)> = scenery
        .iter()
        .enumerate()
        .filter(|(_, s)| s.reference_image.is_none())
        .map(|(i, s)| (i, s.name.clone(), s.description.clone()))
        .collect();
    let results: Vec<(usize, ComicResult<ImageData>)> = futures_util::stream::iter(scenery_jobs)
        .map(|(i, name, description)| async move {
            (i, reference_image(artist, "location", &name, &description, style).await)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    for (i, result) in results {
        match result {
            Ok(image) => scenery[i].reference_image = Some(image),
            Err(e) => warn!("Reference image for {} failed: {}", scenery[i].name, e),
        }
    }
}
