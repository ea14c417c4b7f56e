//! The parallel statement replay engine: a fixed-size worker group, one
//! worker per cluster session, draining a shared work queue that is fully
//! populated and closed before the first worker starts.

use std::{
    collections::BTreeSet,
    fs::File,
    os::unix::fs::{
        FileExt as _,
        OpenOptionsExt as _,
    },
    path::Path,
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
    },
};

use anyhow::Context as _;
use async_channel::Receiver;
use db_connection::ConnectionPool;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::{
        OffsetStatement,
        Statement,
    },
    progress::{
        new_progress_bar,
        ProgressBar,
    },
};

/// Shared mutable substrate for one engine invocation. Created per call and
/// dropped when it returns, so sequential batches never share or leak error
/// state.
struct BatchState {
    on_error_continue: bool,
    cancel: CancellationToken,
    /// Write-once latch: the first fatal error wins, later ones are dropped.
    fatal: Mutex<Option<anyhow::Error>>,
    num_errors: AtomicU32,
    /// `schema.name` of every statement that failed under continue-on-error.
    failed_objects: Mutex<BTreeSet<String>>,
}

impl BatchState {
    fn new(on_error_continue: bool, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            on_error_continue,
            cancel,
            fatal: Mutex::new(None),
            num_errors: AtomicU32::new(0),
            failed_objects: Mutex::new(BTreeSet::new()),
        })
    }

    /// Workers consult this before every unit of work and never start a new
    /// statement once it returns true. Items still queued are simply left
    /// unconsumed.
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.fatal.lock().is_some()
    }

    fn record_fatal(&self, err: anyhow::Error) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
    }

    /// Returns false when the failure was latched as fatal and the worker
    /// should stop consuming work.
    fn record_failure(&self, object: String, err: anyhow::Error, in_parallel: bool) -> bool {
        if !self.on_error_continue {
            self.record_fatal(err);
            return false;
        }
        if in_parallel {
            self.num_errors.fetch_add(1, Ordering::SeqCst);
        } else {
            // Serial mode runs exactly one worker, so this counter has no
            // other writer; the relaxed ordering is the single-worker fast
            // path.
            self.num_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.failed_objects.lock().insert(object);
        true
    }
}

/// Replays statement catalogs against the cluster or into a plan file. Owns
/// the collaborators that outlive a single invocation: the connection pool,
/// the continue-on-error policy, and the injected cancellation token. The
/// token is only polled here; installing a signal handler is the binary's
/// business.
pub struct Restorer {
    pool: Arc<dyn ConnectionPool>,
    on_error_continue: bool,
    cancel: CancellationToken,
}

impl Restorer {
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        on_error_continue: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            on_error_continue,
            cancel,
        }
    }

    /// Drains `statements` across the worker group, executing each on its
    /// worker's session. Serial mode (`parallel == false`) runs one worker
    /// on `which_conn` (default session when omitted); parallel mode runs
    /// one worker per pool session, all draining the same queue.
    ///
    /// Returns the number of recovered failures. A failure with
    /// continue-on-error disabled is returned as `Err` instead, after every
    /// worker has observed the latch and stopped.
    pub async fn execute_statements(
        &self,
        statements: Vec<Statement>,
        progress: Arc<dyn ProgressBar>,
        parallel: bool,
        which_conn: Option<usize>,
    ) -> anyhow::Result<u32> {
        let state = BatchState::new(self.on_error_continue, self.cancel.clone());
        let tasks = enqueue(statements);
        if !parallel {
            let conn_num = self.pool.validate_conn_num(which_conn)?;
            execute_statements_for_conn(
                tasks,
                state.clone(),
                self.pool.clone(),
                progress,
                conn_num,
                false,
            )
            .await;
        } else {
            let mut workers = JoinSet::new();
            for i in 0..self.pool.num_conns() {
                let conn_num = self.pool.validate_conn_num(Some(i))?;
                workers.spawn(execute_statements_for_conn(
                    tasks.clone(),
                    state.clone(),
                    self.pool.clone(),
                    progress.clone(),
                    conn_num,
                    true,
                ));
            }
            while let Some(joined) = workers.join_next().await {
                joined.context("restore worker panicked")?;
            }
        }
        finish_batch(&state)
    }

    /// Same worker topology as [`Self::execute_statements`], but each record
    /// carries a byte offset and the workers write its text at exactly that
    /// position in one shared output file. Offsets are pre-assigned and
    /// disjoint, so the positional writes need no coordination.
    pub async fn write_statements(
        &self,
        statements: Vec<OffsetStatement>,
        progress: Arc<dyn ProgressBar>,
        parallel: bool,
        path: &Path,
    ) -> anyhow::Result<u32> {
        let state = BatchState::new(self.on_error_continue, self.cancel.clone());
        let output_file = match open_output_file(path) {
            Ok(f) => Arc::new(f),
            Err(err) => {
                tracing::debug!(
                    "Error while opening file: {} Error was: {err:#}",
                    path.display()
                );
                if !state.on_error_continue {
                    println!();
                    return Err(err);
                }
                // One recovered error for the whole batch: nothing can be
                // written without the file, so skip it instead of failing
                // every statement against a dead handle.
                state.num_errors.fetch_add(1, Ordering::Relaxed);
                return finish_batch(&state);
            },
        };
        let tasks = enqueue(statements);
        if !parallel {
            write_statements_for_conn(tasks, state.clone(), output_file, progress, false).await;
        } else {
            let mut workers = JoinSet::new();
            for _ in 0..self.pool.num_conns() {
                workers.spawn(write_statements_for_conn(
                    tasks.clone(),
                    state.clone(),
                    output_file.clone(),
                    progress.clone(),
                    true,
                ));
            }
            while let Some(joined) = workers.join_next().await {
                joined.context("writer worker panicked")?;
            }
        }
        finish_batch(&state)
    }

    /// Builds a progress sink from a title and display flag, then delegates
    /// to [`Self::execute_statements`].
    pub async fn execute_statements_with_progress(
        &self,
        statements: Vec<Statement>,
        objects_title: &str,
        show_progress: bool,
        parallel: bool,
        which_conn: Option<usize>,
    ) -> anyhow::Result<u32> {
        let progress = new_progress_bar(statements.len(), objects_title, show_progress);
        progress.start();
        let num_errors = self
            .execute_statements(statements, progress.clone(), parallel, which_conn)
            .await?;
        progress.finish();
        Ok(num_errors)
    }

    /// Builds a progress sink from a title and display flag, then delegates
    /// to [`Self::write_statements`].
    pub async fn write_statements_with_progress(
        &self,
        statements: Vec<OffsetStatement>,
        objects_title: &str,
        show_progress: bool,
        parallel: bool,
        path: &Path,
    ) -> anyhow::Result<u32> {
        let progress = new_progress_bar(statements.len(), objects_title, show_progress);
        progress.start();
        let num_errors = self
            .write_statements(statements, progress.clone(), parallel, path)
            .await?;
        progress.finish();
        Ok(num_errors)
    }
}

/// Loads the whole batch into a closed queue before any worker starts;
/// workers drain it until empty, there is no late insertion.
fn enqueue<T: std::fmt::Debug>(items: Vec<T>) -> Receiver<T> {
    let (tx, rx) = async_channel::bounded(items.len().max(1));
    for item in items {
        tx.try_send(item)
            .expect("work queue is sized to the statement list");
    }
    rx
}

async fn execute_statements_for_conn(
    tasks: Receiver<Statement>,
    state: Arc<BatchState>,
    pool: Arc<dyn ConnectionPool>,
    progress: Arc<dyn ProgressBar>,
    which_conn: usize,
    in_parallel: bool,
) {
    while let Ok(statement) = tasks.recv().await {
        if state.should_stop() {
            return;
        }
        if let Err(err) = pool.execute(&statement.text, which_conn).await {
            tracing::debug!(
                "Error encountered when executing statement: {} Error was: {err:#}",
                statement.text.trim()
            );
            if !state.record_failure(statement.qualified_name(), err, in_parallel) {
                continue;
            }
        }
        progress.increment();
    }
}

async fn write_statements_for_conn(
    tasks: Receiver<OffsetStatement>,
    state: Arc<BatchState>,
    output_file: Arc<File>,
    progress: Arc<dyn ProgressBar>,
    in_parallel: bool,
) {
    while let Ok(record) = tasks.recv().await {
        if state.should_stop() {
            return;
        }
        if let Err(err) =
            output_file.write_all_at(record.statement.text.as_bytes(), record.offset)
        {
            tracing::debug!(
                "Error encountered when writing statement: {} Error was: {err:#}",
                record.statement.text.trim()
            );
            if !state.record_failure(record.statement.qualified_name(), err.into(), in_parallel) {
                continue;
            }
        }
        progress.increment();
    }
}

fn open_output_file(path: &Path) -> anyhow::Result<File> {
    File::options()
        .create(true)
        .write(true)
        .mode(0o640)
        .open(path)
        .with_context(|| format!("opening output file {}", path.display()))
}

/// Inspects the invocation's shared state after every worker has joined: a
/// latched fatal error ends the run, a nonzero recovered count is summarized
/// and returned, and later batches carry on.
fn finish_batch(state: &BatchState) -> anyhow::Result<u32> {
    if let Some(err) = state.fatal.lock().take() {
        println!();
        return Err(err);
    }
    let num_errors = state.num_errors.load(Ordering::SeqCst);
    if num_errors > 0 {
        println!();
        match cmd_util::env::log_file_path() {
            Some(path) => tracing::error!(
                "Encountered {num_errors} errors during metadata restore; see log file {} for a \
                 list of failed statements.",
                path.display()
            ),
            None => tracing::error!(
                "Encountered {num_errors} errors during metadata restore; rerun with --log-file \
                 for a list of failed statements."
            ),
        }
        tracing::debug!("Failed objects: {:?}", state.failed_objects.lock());
    }
    Ok(num_errors)
}
