//! A recording in-memory pool for exercising the restore engine without a
//! cluster.

use std::{
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ConnectionPool;

pub struct TestConnectionPool {
    num_conns: usize,
    fail_marker: Option<String>,
    latency: Option<Duration>,
    executed: Mutex<Vec<(usize, String)>>,
}

impl TestConnectionPool {
    pub fn new(num_conns: usize) -> Arc<Self> {
        Arc::new(Self {
            num_conns,
            fail_marker: None,
            latency: None,
            executed: Mutex::new(Vec::new()),
        })
    }

    /// Statements whose text contains `marker` fail with an error naming the
    /// statement.
    pub fn failing_on(num_conns: usize, marker: &str) -> Arc<Self> {
        Arc::new(Self {
            num_conns,
            fail_marker: Some(marker.to_owned()),
            latency: None,
            executed: Mutex::new(Vec::new()),
        })
    }

    /// Adds a fixed delay to every statement so parallel workers genuinely
    /// interleave.
    pub fn with_latency(num_conns: usize, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            num_conns,
            fail_marker: None,
            latency: Some(latency),
            executed: Mutex::new(Vec::new()),
        })
    }

    /// Every statement executed so far as `(which_conn, text)` pairs, in
    /// completion order.
    pub fn executed(&self) -> Vec<(usize, String)> {
        self.executed.lock().clone()
    }

    pub fn executed_texts(&self) -> Vec<String> {
        self.executed.lock().iter().map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait]
impl ConnectionPool for TestConnectionPool {
    fn num_conns(&self) -> usize {
        self.num_conns
    }

    async fn execute(&self, sql: &str, which_conn: usize) -> anyhow::Result<()> {
        assert!(which_conn < self.num_conns, "unvalidated connection number");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.executed.lock().push((which_conn, sql.to_owned()));
        if let Some(marker) = &self.fail_marker {
            if sql.contains(marker) {
                anyhow::bail!("simulated failure executing {sql}");
            }
        }
        Ok(())
    }
}
