use crate::core::config::StyleConfig;
use crate::core::state::{Bounds, LetteringElement, LetteringKind, Panel, TailTip, TextStyle};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

pub fn lettering_prompt(panel: &Panel, style: &StyleConfig) -> String {
    let mut text = String::new();
    if !panel.narration.trim().is_empty() {
        text.push_str(&format!("Narration: {}\n", panel.narration));
    }
    for line in &panel.dialogue {
        text.push_str(&format!("{}: {}\n", line.speaker, line.line));
    }
    if text.is_empty() {
        text.push_str("(no text)\n");
    }

    format!(
        "You are a comic letterer. Look at the attached panel artwork and place the text below \
         as lettering elements. Use 'narration' boxes for narration and 'dialogue', 'thought' or \
         'shout' balloons for speech. Give each box x, y, width and height as percentages of the \
         panel, avoid covering faces and the focal point, and point each balloon tail (tail_x, \
         tail_y in percent) at the speaker's mouth. Keep the text exactly as given, in language '{}'.\n\n\
         Panel description: {}\n\n{}",
        style.language, panel.description, text
    )
}

pub fn lettering_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "elements": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "kind": { "type": "STRING", "enum": ["dialogue", "narration", "thought", "shout"] },
                        "text": { "type": "STRING" },
                        "x": { "type": "NUMBER" },
                        "y": { "type": "NUMBER" },
                        "width": { "type": "NUMBER" },
                        "height": { "type": "NUMBER" },
                        "tail_x": { "type": "NUMBER" },
                        "tail_y": { "type": "NUMBER" }
                    },
                    "required": ["kind", "text", "x", "y", "width", "height"]
                }
            }
        },
        "required": ["elements"]
    })
}

#[derive(Deserialize)]
struct LetteringResponse {
    elements: Vec<RawElement>,
}

#[derive(Deserialize)]
struct RawElement {
    kind: LetteringKind,
    text: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    #[serde(default)]
    tail_x: Option<f32>,
    #[serde(default)]
    tail_y: Option<f32>,
}

fn percent(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub fn new_element_id(panel_number: u32, index: usize) -> String {
    format!("p{}-{}-{:06x}", panel_number, index, rand::random::<u32>() & 0x00ff_ffff)
}

pub fn parse_lettering(panel_number: u32, value: serde_json::Value) -> Result<Vec<LetteringElement>> {
    let response: LetteringResponse =
        serde_json::from_value(value).context("Failed to parse lettering response")?;

    let elements = response
        .elements
        .into_iter()
        .filter(|e| !e.text.trim().is_empty())
        .enumerate()
        .map(|(i, e)| {
            let x = percent(e.x);
            let y = percent(e.y);
            let tail = match (e.kind, e.tail_x, e.tail_y) {
                (LetteringKind::Narration, _, _) => None,
                (_, Some(tx), Some(ty)) => Some(TailTip {
                    x: percent(tx),
                    y: percent(ty),
                }),
                _ => None,
            };
            LetteringElement {
                id: new_element_id(panel_number, i),
                kind: e.kind,
                text: e.text,
                bounds: Bounds {
                    x,
                    y,
                    width: percent(e.width).min(100.0 - x),
                    height: percent(e.height).min(100.0 - y),
                },
                style: TextStyle::for_kind(e.kind),
                tail,
            }
        })
        .collect();
    Ok(elements)
}
