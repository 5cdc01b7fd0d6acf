//! Progress bars for pipeline stages, and a log writer that keeps them pinned.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

const STAGE_TEMPLATE: &str =
    "{prefix:>8.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] {pos}/{len} ({per_sec}) {msg}";

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// A progress bar for one pipeline stage over `len` items
pub fn stage_progress_bar(stage: &str, len: u64) -> ProgressBar {
    let style = ProgressStyle::with_template(STAGE_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let bar = multi_progress().add(ProgressBar::new(len));
    bar.set_style(style);
    bar.set_prefix(stage.to_string());
    bar
}

fn emit_line(line: &str) {
    let line = line.trim_end_matches('\r');
    let _ = multi_progress().println(line);
}

/// `MakeWriter` for tracing-subscriber that prints through the shared MultiProgress
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    pending: String,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.push_str(&String::from_utf8_lossy(buf));

        while let Some(idx) = self.pending.find('\n') {
            emit_line(&self.pending[..idx]);
            self.pending.drain(..=idx);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            emit_line(&self.pending);
            self.pending.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            pending: String::new(),
        }
    }
}
