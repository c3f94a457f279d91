use crate::core::config::StyleConfig;
use crate::core::errors::{ComicError, ComicResult};
use crate::core::state::{renumber_panels, Character, DialogueLine, Panel, PanelLayout, Scenery, SoundEffect};
use serde::Deserialize;
use serde_json::json;

pub fn strip_code_blocks(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}

pub fn cast_context(characters: &[Character], scenery: &[Scenery]) -> String {
    let mut out = String::new();
    if !characters.is_empty() {
        out.push_str("Characters:\n");
        for c in characters {
            out.push_str(&format!("- {}: {}\n", c.name, c.description));
        }
    }
    if !scenery.is_empty() {
        out.push_str("Locations:\n");
        for s in scenery {
            out.push_str(&format!("- {}: {}\n", s.name, s.description));
        }
    }
    out
}

pub fn script_prompt(
    chapter_text: &str,
    characters: &[Character],
    scenery: &[Scenery],
    style: &StyleConfig,
    full_story: &str,
) -> String {
    format!(
        "You are a comic book writer. Break the chapter below into comic panels.\n\
         For every panel give a visual description for the artist, optional narration, \
         dialogue as speaker/line pairs, a layout (standard, wide, tall or splash) and an \
         optional sound effect. Number panels from 1 in reading order.\n\
         Write narration and dialogue in language '{}'. Art style: {}.\n\n\
         {}\n\
         Story so far (for context only):\n{}\n\n\
         Chapter:\n{}",
        style.language,
        style.art_style,
        cast_context(characters, scenery),
        full_story.chars().take(20000).collect::<String>(),
        chapter_text,
    )
}

pub fn script_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "panels": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "number": { "type": "INTEGER" },
                        "description": { "type": "STRING" },
                        "narration": { "type": "STRING" },
                        "dialogue": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "speaker": { "type": "STRING" },
                                    "line": { "type": "STRING" }
                                },
                                "required": ["speaker", "line"]
                            }
                        },
                        "layout": { "type": "STRING", "enum": ["standard", "wide", "tall", "splash"] },
                        "sfx": {
                            "type": "OBJECT",
                            "properties": {
                                "text": { "type": "STRING" },
                                "style": { "type": "STRING" }
                            }
                        }
                    },
                    "required": ["number", "description"]
                }
            }
        },
        "required": ["panels"]
    })
}

#[derive(Deserialize)]
struct ScriptResponse {
    panels: Vec<ScriptPanel>,
}

#[derive(Deserialize)]
struct ScriptPanel {
    #[serde(default)]
    number: u32,
    description: String,
    #[serde(default)]
    narration: Option<String>,
    #[serde(default)]
    dialogue: Vec<DialogueLine>,
    #[serde(default)]
    layout: Option<String>,
    #[serde(default)]
    sfx: Option<SoundEffect>,
}

fn parse_layout(layout: Option<&str>) -> PanelLayout {
    match layout.map(|l| l.trim().to_lowercase()).as_deref() {
        Some("wide") => PanelLayout::Wide,
        Some("tall") => PanelLayout::Tall,
        Some("splash") => PanelLayout::Splash,
        _ => PanelLayout::Standard,
    }
}

/// Turns the script reply into fresh panels, ordered by panel number and
/// marked as generating. Accepts `{ "panels": [...] }` or a bare array.
pub fn parse_script(value: serde_json::Value) -> ComicResult<Vec<Panel>> {
    let script: Vec<ScriptPanel> = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value::<ScriptResponse>(value).map(|r| r.panels)
    }
    .map_err(|e| ComicError::ScriptGeneration(format!("unparsable script: {}", e)))?;

    if script.is_empty() {
        return Err(ComicError::ScriptGeneration(
            "backend returned no panels".to_string(),
        ));
    }

    let mut script = script;
    // Stable sort: panels with equal numbers keep reply order.
    script.sort_by_key(|p| p.number);

    let mut panels: Vec<Panel> = script
        .into_iter()
        .map(|p| {
            let mut panel = Panel::new(p.number, p.description);
            panel.narration = p.narration.unwrap_or_default();
            panel.dialogue = p.dialogue;
            panel.layout = parse_layout(p.layout.as_deref());
            panel.sfx = p.sfx.filter(|s| !s.text.trim().is_empty());
            panel.is_generating = true;
            panel
        })
        .collect();
    renumber_panels(&mut panels);
    Ok(panels)
}
