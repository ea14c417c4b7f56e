use crate::{
    batch::batch_postdata_statements,
    catalog::Statement,
    parallel::Restorer,
};

/// Replays postdata statements in the three deadlock-safe batches. Batch
/// boundaries are barriers: each batch is one blocking engine invocation, so
/// every index in the first batch exists before the second batch starts, and
/// every object in the second exists before its metadata replays in the
/// third.
///
/// With `skip_indexes` set, the batching routes all index work into the first
/// batch and the driver drops it instead of executing it.
///
/// Returns the total number of recovered errors across batches; the first
/// fatal error ends the run.
pub async fn restore_postdata(
    restorer: &Restorer,
    statements: Vec<Statement>,
    skip_indexes: bool,
    parallel: bool,
    show_progress: bool,
) -> anyhow::Result<u32> {
    let (first_batch, second_batch, third_batch) =
        batch_postdata_statements(statements, skip_indexes);
    let mut num_errors = 0;
    if skip_indexes {
        if !first_batch.is_empty() {
            tracing::info!(
                "Skipping {} index statements at operator request",
                first_batch.len()
            );
        }
    } else if !first_batch.is_empty() {
        num_errors += restorer
            .execute_statements_with_progress(
                first_batch,
                "Table indexes restored",
                show_progress,
                parallel,
                None,
            )
            .await?;
    }
    if !second_batch.is_empty() {
        num_errors += restorer
            .execute_statements_with_progress(
                second_batch,
                "Postdata objects restored",
                show_progress,
                parallel,
                None,
            )
            .await?;
    }
    if !third_batch.is_empty() {
        num_errors += restorer
            .execute_statements_with_progress(
                third_batch,
                "Postdata metadata restored",
                show_progress,
                parallel,
                None,
            )
            .await?;
    }
    Ok(num_errors)
}
