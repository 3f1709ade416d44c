use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright_green, bright_red, bright_yellow};

/// Spinner shown on stderr while waiting for a stage to finish
pub struct WaitProgress {
    pb: ProgressBar,
}

impl WaitProgress {
    pub fn start(stage: &str, timeout: Duration) -> Self {
        let pb = create_spinner(
            bright_yellow(format!(
                "Waiting for stage '{stage}' (timeout: {}s)",
                timeout.as_secs()
            ))
            .to_string(),
        );
        Self { pb }
    }

    pub fn finish_success(self, stage: &str) {
        self.pb
            .finish_with_message(bright_green(format!("Stage '{stage}' completed ✓")).to_string());
    }

    pub fn finish_failure(self, stage: &str, failed: usize) {
        self.pb.finish_with_message(
            bright_red(format!("Stage '{stage}' finished with {failed} failed worker(s) ✗"))
                .to_string(),
        );
    }

    pub fn abandon(self) {
        self.pb.abandon();
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner} {elapsed}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
