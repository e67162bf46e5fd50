use std::env;
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Progress sink for long-running installs.
///
/// A determinate phase counts `completed` out of `total`; an indeterminate
/// phase only shows that work is happening.
pub trait Progress: Send + Sync {
    fn start(&self);
    fn switch_to_indeterminate(&self);
    fn switch_to_determinate(&self, total: usize);
    fn advance(&self, completed: usize);
    fn message(&self, text: &str);
    fn finish(&self, text: &str);
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&self) {}
    fn switch_to_indeterminate(&self) {}
    fn switch_to_determinate(&self, _total: usize) {}
    fn advance(&self, _completed: usize) {}
    fn message(&self, _text: &str) {}
    fn finish(&self, _text: &str) {}
}

pub(crate) fn progress_enabled() -> bool {
    match env::var("NBX_PROGRESS") {
        Ok(value) => value != "0",
        Err(_) => io::stderr().is_terminal(),
    }
}

#[derive(Default)]
struct RenderState {
    stop: AtomicBool,
    current: AtomicUsize,
    /// Zero while indeterminate.
    total: AtomicUsize,
    label: Mutex<String>,
}

/// Spinner/counter rendered on stderr by a background thread.
pub struct TerminalProgress {
    state: Arc<RenderState>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    enabled: bool,
}

impl TerminalProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_enabled(label, progress_enabled())
    }

    pub fn with_enabled(label: impl Into<String>, enabled: bool) -> Self {
        let state = RenderState {
            label: Mutex::new(label.into()),
            ..RenderState::default()
        };
        Self {
            state: Arc::new(state),
            handle: Mutex::new(None),
            enabled,
        }
    }

    fn stop_renderer(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.state.stop.store(true, AtomicOrdering::Relaxed);
            let _ = handle.join();
            let _ = io::stderr().write_all(b"\r\x1b[2K");
            let _ = io::stderr().flush();
        }
    }

    fn run(state: &RenderState) {
        const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let mut idx = 0;
        while !state.stop.load(AtomicOrdering::Relaxed) {
            let frame = FRAMES[idx % FRAMES.len()];
            idx += 1;
            let label = state
                .label
                .lock()
                .map(|label| label.clone())
                .unwrap_or_default();
            let total = state.total.load(AtomicOrdering::Relaxed);
            let line = if total > 0 {
                let current = state.current.load(AtomicOrdering::Relaxed).min(total);
                format!("\r\x1b[2Knbx ▸ {label} [{current}/{total}] {frame}")
            } else {
                format!("\r\x1b[2Knbx ▸ {label} {frame}")
            };
            let _ = io::stderr().write_all(line.as_bytes());
            let _ = io::stderr().flush();
            thread::sleep(Duration::from_millis(80));
        }
    }
}

impl Progress for TerminalProgress {
    fn start(&self) {
        if !self.enabled {
            return;
        }
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        self.state.stop.store(false, AtomicOrdering::Relaxed);
        let state = Arc::clone(&self.state);
        *slot = thread::Builder::new()
            .name("nbx-progress".into())
            .spawn(move || TerminalProgress::run(&state))
            .ok();
    }

    fn switch_to_indeterminate(&self) {
        self.state.total.store(0, AtomicOrdering::Relaxed);
    }

    fn switch_to_determinate(&self, total: usize) {
        self.state.current.store(0, AtomicOrdering::Relaxed);
        self.state.total.store(total, AtomicOrdering::Relaxed);
    }

    fn advance(&self, completed: usize) {
        self.state.current.store(completed, AtomicOrdering::Relaxed);
    }

    fn message(&self, text: &str) {
        if let Ok(mut label) = self.state.label.lock() {
            *label = text.to_string();
        }
        tracing::debug!(progress = text);
    }

    fn finish(&self, text: &str) {
        self.stop_renderer();
        if self.enabled {
            eprintln!("nbx ▸ {text}");
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.stop_renderer();
    }
}
