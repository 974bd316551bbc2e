//! Console progress output

use colored::*;
use kiln_core::domain::progress::ProgressEvent;
use kiln_engine::ProgressSink;
use std::io::Write;

/// Width of the upload bar, in characters
const BAR_WIDTH: usize = 20;

/// Prints pull status, container output and an upload bar to stdout
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    /// An upload bar is drawn on the current line
    uploading: bool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_upload_line(&mut self) {
        if self.uploading {
            println!();
            self.uploading = false;
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn write(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Pull(line) => {
                self.end_upload_line();
                println!("  {} {}", "↓".cyan(), line.dimmed());
            }
            ProgressEvent::Output(line) => {
                self.end_upload_line();
                println!("  {} {}", "│".dimmed(), line);
            }
            ProgressEvent::Upload { sent, total } => {
                print!("\r  {} {}", "↑".cyan(), upload_bar(sent, total));
                let _ = std::io::stdout().flush();
                self.uploading = true;
                if sent >= total {
                    self.end_upload_line();
                }
            }
        }
    }
}

/// Renders `[#####...............]  25.0%`
pub fn upload_bar(sent: u64, total: u64) -> String {
    let percent = ProgressEvent::Upload { sent, total }
        .percent()
        .unwrap_or(100.0)
        .clamp(0.0, 100.0);
    let filled = ((percent / 100.0) * BAR_WIDTH as f64) as usize;

    format!(
        "[{}{}] {:5.1}%",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        percent
    )
}
