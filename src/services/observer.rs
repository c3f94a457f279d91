use crate::core::state::Panel;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ScriptReady,
    PanelImage { index: usize },
    Cancelled,
    LetteringMerged,
}

/// Receives the full panel list after every state change of a run.
pub trait ProgressObserver: Send + Sync {
    fn on_panels(&self, stage: Stage, panels: &[Panel]);
}

pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new(chapter_title: &str) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(chapter_title.to_string());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_panels(&self, stage: Stage, panels: &[Panel]) {
        match stage {
            Stage::ScriptReady => {
                self.bar.set_length(panels.len() as u64);
                self.bar.set_position(0);
            }
            Stage::PanelImage { index } => self.bar.set_position(index as u64 + 1),
            Stage::Cancelled => self.bar.abandon_with_message("cancelled"),
            Stage::LetteringMerged => self.bar.set_message("lettered"),
        }
    }
}
