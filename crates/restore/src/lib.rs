//! Replays a captured catalog of DDL statements against a segmented cluster,
//! in parallel where that is safe, or writes them into an offset-addressed
//! plan file. The postdata batching in [`batch`] is what makes the parallel
//! replay safe: it closes a storage-engine deadlock window around concurrent
//! index creation on append-optimized tables.

pub mod batch;
pub mod catalog;
pub mod driver;
pub mod parallel;
pub mod progress;


pub use crate::{
    batch::batch_postdata_statements,
    catalog::{
        OffsetStatement,
        Statement,
    },
    driver::restore_postdata,
    parallel::Restorer,
    progress::{
        new_progress_bar,
        ProgressBar,
    },
};
