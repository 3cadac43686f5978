use console::style;
use envpatch_core::mutation::{MutationEvent, MutationObserver, Stage};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn default_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

fn summary_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress wording for a running stage
pub fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Capture => "capturing configuration",
        Stage::Patch => "patching environment",
        Stage::Stop => "stopping",
        Stage::Create => "creating replacement",
        Stage::Remove => "removing original",
        Stage::Rename => "renaming replacement",
        Stage::Start => "starting",
    }
}

/// Spinner on stderr that follows the recreate pipeline of a batch.
#[derive(Debug)]
pub struct StageSpinner {
    pb: ProgressBar,
}

impl StageSpinner {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(80));
        pb.set_style(default_style());
        Self { pb }
    }

    /// Spinner that draws nowhere, for tests
    #[cfg(test)]
    fn hidden() -> Self {
        let pb = ProgressBar::hidden();
        pb.set_style(default_style());
        Self { pb }
    }

    #[cfg(test)]
    fn message(&self) -> String {
        self.pb.message()
    }

    /// Replace the spinner with a one-line summary
    pub fn finish(self, failed: usize, total: usize) {
        let line = if failed == 0 {
            format!(
                "{}",
                style(format!("Patched {} container(s)", total)).green()
            )
        } else {
            format!(
                "{}",
                style(format!("{} of {} container(s) failed", failed, total)).red()
            )
        };
        self.pb.set_style(summary_style());
        self.pb.finish_with_message(line);
    }
}

impl Default for StageSpinner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StageSpinner {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}

impl MutationObserver for StageSpinner {
    fn on_event(&self, event: &MutationEvent) {
        match event {
            MutationEvent::StageStarted { container, stage } => {
                self.pb.set_message(format!(
                    "{}",
                    style(format!("{}: {}…", container, stage_label(*stage))).yellow()
                ));
            }
            MutationEvent::StageCompleted { .. } => {}
            MutationEvent::StageFailed { container, stage } => {
                self.pb.println(format!(
                    "{}",
                    style(format!("✗ {}: {} failed", container, stage)).red()
                ));
            }
            MutationEvent::Finished { container, new_id } => {
                self.pb.println(format!(
                    "{}",
                    style(format!(
                        "✓ {} recreated as {}",
                        container,
                        envpatch_core::docker::short_id(new_id)
                    ))
                    .green()
                ));
            }
            MutationEvent::Skipped { container } => {
                self.pb
                    .println(format!("{}", style(format!("= {} unchanged", container)).dim()));
            }
        }
    }
}
