use std::sync::{
    atomic::{
        AtomicUsize,
        Ordering,
    },
    Arc,
};

/// The engine's only view of progress. `increment` is called once per
/// statement attempt (success or recovered failure) and never for a
/// fatally-failed statement; `start`/`finish` bracket a batch.
pub trait ProgressBar: Send + Sync {
    fn start(&self);
    fn increment(&self);
    fn finish(&self);
}

/// Reports through the log; rendering a live terminal bar is the caller's
/// business, not the engine's.
pub struct LogProgressBar {
    title: String,
    total: usize,
    completed: AtomicUsize,
}

impl LogProgressBar {
    pub fn new(title: String, total: usize) -> Self {
        Self {
            title,
            total,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl ProgressBar for LogProgressBar {
    fn start(&self) {
        tracing::info!("{}: replaying {} statements", self.title, self.total);
    }

    fn increment(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        tracing::info!(
            "{}: {}/{} statements done",
            self.title,
            self.completed(),
            self.total
        );
    }
}

pub struct NoopProgressBar;

impl ProgressBar for NoopProgressBar {
    fn start(&self) {}

    fn increment(&self) {}

    fn finish(&self) {}
}

pub fn new_progress_bar(total: usize, title: &str, show: bool) -> Arc<dyn ProgressBar> {
    if show {
        Arc::new(LogProgressBar::new(title.to_owned(), total))
    } else {
        Arc::new(NoopProgressBar)
    }
}
