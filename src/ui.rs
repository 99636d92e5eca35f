//! Terminal rendering of a watch stream: spinner plus coloured state lines.
//!
//! Uses `indicatif` for the spinner and `console` for styling. [`WatchView`]
//! follows one plugin until its watch ends.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{FAILED, TERMINATED};
use crate::status::{Frame, StatusRecord, Watch};
use crate::task::{Task, TaskStatus};

/// Spinner-backed view of a plugin's status changes.
pub struct WatchView {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
    last_state: Option<String>,
}

impl WatchView {
    pub fn start(kind: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{kind}: connecting"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            last_state: None,
        }
    }

    /// Renders one frame. State changes get their own line; payload-only
    /// updates only move the spinner message.
    pub fn frame(&mut self, frame: &Frame) {
        let Some(record) = frame.record() else {
            self.pb.tick();
            return;
        };
        let version = record.resource_version();
        if self.last_state.as_deref() != Some(record.state.as_str()) {
            let style = self.style_for(&record.state);
            let detail = match record.reason() {
                Some(reason) if record.state == FAILED => format!(": {reason}"),
                _ => String::new(),
            };
            self.pb.println(format!(
                "  {} {}{detail}",
                self.dim.apply_to(format!("v{version:<4}")),
                style.apply_to(&record.state)
            ));
            self.last_state = Some(record.state.clone());
        }
        let payload = if record.payload.is_null() {
            String::new()
        } else {
            format!(" {}", record.payload)
        };
        self.pb.set_message(format!("{}{payload}", record.state));
    }

    /// Consumes the watch until it ends, then prints where the plugin settled.
    pub async fn follow(mut self, mut watch: Watch) {
        let mut last = None;
        while let Some(frame) = watch.next().await {
            self.frame(&frame);
            if let Some(record) = frame.record() {
                last = Some(record.clone());
            }
        }
        match last {
            Some(record) => self.finish(&record),
            None => self.pb.finish_and_clear(),
        }
    }

    /// Clears the spinner and prints the final status.
    pub fn finish(&self, record: &StatusRecord) {
        self.pb.finish_and_clear();
        let style = self.style_for(&record.state);
        let mark = if record.state == FAILED { "✗" } else { "✓" };
        println!(
            "  {} {} settled in {} at version {}",
            style.apply_to(mark),
            record.kind(),
            style.apply_to(&record.state),
            record.resource_version()
        );
    }

    fn style_for(&self, state: &str) -> &Style {
        match state {
            FAILED => &self.red,
            TERMINATED | "ready" | "initialized" | "in_episode" | "completed_episode" => {
                &self.green
            }
            _ => &self.yellow,
        }
    }
}

/// Prints task records as pretty JSON, newest last.
pub fn print_tasks(tasks: &[Task]) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    println!();
    println!("{}", green.apply_to("─── Tasks ───"));
    for task in tasks {
        let style = match task.status {
            TaskStatus::Failed => &red,
            _ => &green,
        };
        println!("{} {}", style.apply_to(task.status), task.operation);
        println!("{}", serde_json::to_string_pretty(task).unwrap_or_default());
    }
}

/// Prints raw watch frames exactly as they go over the wire.
pub async fn print_raw(mut watch: Watch) {
    use std::io::Write;
    while let Some(frame) = watch.next().await {
        match frame.to_wire() {
            Ok(line) => {
                print!("{line}");
                let _ = std::io::stdout().flush();
            }
            Err(err) => tracing::warn!(error = %err, "cannot encode watch frame"),
        }
    }
}
