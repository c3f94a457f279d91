use crate::utils::image::ImageData;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanelLayout {
    #[default]
    Standard,
    Wide,
    Tall,
    Splash,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DialogueLine {
    pub speaker: String,
    pub line: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SoundEffect {
    pub text: String,
    #[serde(default)]
    pub style: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LetteringKind {
    Dialogue,
    Narration,
    Thought,
    Shout,
}

/// Box position and size, each a percentage (0-100) of the panel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TailTip {
    pub x: f32,
    pub y: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: f32,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    pub color: String,
}

impl TextStyle {
    pub fn for_kind(kind: LetteringKind) -> Self {
        let (font_family, bold, italic) = match kind {
            LetteringKind::Dialogue => ("Comic Neue", false, false),
            LetteringKind::Narration => ("Comic Neue", false, true),
            LetteringKind::Thought => ("Comic Neue", false, true),
            LetteringKind::Shout => ("Bangers", true, false),
        };
        Self {
            font_family: font_family.to_string(),
            font_size: if kind == LetteringKind::Shout { 18.0 } else { 14.0 },
            bold,
            italic,
            color: "#000000".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LetteringElement {
    pub id: String,
    pub kind: LetteringKind,
    pub text: String,
    pub bounds: Bounds,
    pub style: TextStyle,
    #[serde(default)]
    pub tail: Option<TailTip>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    Pending,
    GeneratingImage,
    ImageReady,
    Lettering,
    Complete,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Panel {
    pub number: u32,
    pub description: String,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub layout: PanelLayout,
    #[serde(default)]
    pub sfx: Option<SoundEffect>,
    #[serde(default)]
    pub image: Option<ImageData>,
    #[serde(default)]
    pub lettering: Option<Vec<LetteringElement>>,
    #[serde(default)]
    pub is_generating: bool,
    #[serde(default)]
    pub is_lettering: bool,
    #[serde(default)]
    pub generation_failed: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Panel {
    pub fn new(number: u32, description: impl Into<String>) -> Self {
        Self {
            number,
            description: description.into(),
            narration: String::new(),
            dialogue: Vec::new(),
            layout: PanelLayout::Standard,
            sfx: None,
            image: None,
            lettering: None,
            is_generating: false,
            is_lettering: false,
            generation_failed: false,
            failure_reason: None,
        }
    }

    pub fn phase(&self) -> PanelPhase {
        if self.generation_failed {
            PanelPhase::Failed
        } else if self.is_generating {
            PanelPhase::GeneratingImage
        } else if self.is_lettering {
            PanelPhase::Lettering
        } else if self.image.is_none() {
            PanelPhase::Pending
        } else if self.lettering.is_some() {
            PanelPhase::Complete
        } else {
            PanelPhase::ImageReady
        }
    }

    pub fn reset_for_generation(&mut self) {
        self.generation_failed = false;
        self.failure_reason = None;
        self.lettering = None;
        self.is_lettering = false;
        self.is_generating = true;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.is_generating = false;
        self.is_lettering = false;
        self.generation_failed = true;
        self.failure_reason = Some(reason.into());
    }

    /// Ready for lettering: has an image and did not fail.
    pub fn can_letter(&self) -> bool {
        self.image.is_some() && !self.generation_failed
    }
}

pub fn renumber_panels(panels: &mut [Panel]) {
    for (i, panel) in panels.iter_mut().enumerate() {
        panel.number = i as u32 + 1;
    }
}

/// Moves the panel at `from` to position `to` and renumbers.
pub fn move_panel(panels: &mut Vec<Panel>, from: usize, to: usize) {
    if from >= panels.len() || to >= panels.len() || from == to {
        return;
    }
    let panel = panels.remove(from);
    panels.insert(to, panel);
    renumber_panels(panels);
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Character {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub reference_image: Option<ImageData>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scenery {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub reference_image: Option<ImageData>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub panels: Vec<Panel>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    pub title: String,
    pub story: String,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub scenery: Vec<Scenery>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}
