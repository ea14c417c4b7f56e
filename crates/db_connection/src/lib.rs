//! Connection handling for a segmented cluster: a fixed-size pool of
//! independent sessions, addressed by index. Each restore worker exclusively
//! owns one session for the duration of an engine invocation, so the pool is
//! sized and bound at construction instead of handing out floating
//! connections.

use std::{
    future::Future,
    sync::LazyLock,
    time::Duration,
};

use anyhow::Context as _;
use async_trait::async_trait;
use cmd_util::env::env_config;
use futures::FutureExt as _;
use tokio::time::sleep;
use tokio_postgres::{
    tls::{
        MakeTlsConnect,
        TlsConnect,
    },
    Client,
    NoTls,
    Socket,
};
use tokio_postgres_rustls::MakeRustlsConnect;
use tokio_util::task::AbortOnDropHandle;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Statement-level timeout, in seconds. 0 disables the timeout; replayed DDL
/// (index builds in particular) can legitimately run for hours, so this
/// defaults to off and exists for operators who know their statements are
/// short.
static STATEMENT_TIMEOUT_SECONDS: LazyLock<u64> =
    LazyLock::new(|| env_config("SEGRESTORE_STATEMENT_TIMEOUT_SECONDS", 0));

async fn with_timeout<R, E, Fut: Future<Output = Result<R, E>>>(f: Fut) -> anyhow::Result<R>
where
    E: Into<anyhow::Error>,
{
    let timeout = *STATEMENT_TIMEOUT_SECONDS;
    if timeout == 0 {
        return f.await.map_err(Into::into);
    }
    futures::select_biased! {
        r = f.fuse() => {
            match r {
                Ok(r) => Ok(r),
                Err(e) => Err(e.into()),
            }
        },
        _ = sleep(Duration::from_secs(timeout)).fuse() => {
            Err(anyhow::anyhow!("statement timed out after {timeout}s"))
        },
    }
}

#[derive(thiserror::Error, Debug)]
#[error("connection number {index} out of range for a pool of {num_conns}")]
pub struct InvalidConnNum {
    pub index: usize,
    pub num_conns: usize,
}

/// The narrow contract the restore engine consumes: N independent sessions,
/// execute-by-index, and connection-number validation.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Pool size N. The engine starts at most this many workers.
    fn num_conns(&self) -> usize;

    /// Maps an omitted connection number to the default session and
    /// bounds-checks an explicit one.
    fn validate_conn_num(&self, which_conn: Option<usize>) -> anyhow::Result<usize> {
        let index = which_conn.unwrap_or(0);
        if index >= self.num_conns() {
            anyhow::bail!(InvalidConnNum {
                index,
                num_conns: self.num_conns(),
            });
        }
        Ok(index)
    }

    /// Runs the statement text on the given session. Captured DDL carries no
    /// parameters, so this is the simple-query path.
    async fn execute(&self, sql: &str, which_conn: usize) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct ClusterPoolConfig {
    pub url: String,
    pub num_conns: usize,
    pub require_ssl: bool,
}

/// Exactly N `tokio_postgres` clients, one per connection number, each with
/// its background connection task. Dropping the pool aborts the tasks and
/// closes the sessions.
pub struct ClusterPool {
    conns: Vec<Client>,
    _connection_tasks: Vec<AbortOnDropHandle<()>>,
}

impl ClusterPool {
    pub async fn connect(config: &ClusterPoolConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.num_conns > 0,
            "cluster pool must be sized to at least one connection"
        );
        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .context("invalid cluster connection url")?;
        let mut conns = Vec::with_capacity(config.num_conns);
        let mut tasks = Vec::with_capacity(config.num_conns);
        let tls = if config.require_ssl {
            Some(rustls_connector()?)
        } else {
            None
        };
        for i in 0..config.num_conns {
            let (client, task) = match &tls {
                Some(tls) => connect_one(&pg_config, tls.clone(), i).await?,
                None => connect_one(&pg_config, NoTls, i).await?,
            };
            conns.push(client);
            tasks.push(task);
        }
        tracing::info!("Established {} sessions to the cluster", conns.len());
        Ok(Self {
            conns,
            _connection_tasks: tasks,
        })
    }
}

async fn connect_one<T>(
    pg_config: &tokio_postgres::Config,
    tls: T,
    which_conn: usize,
) -> anyhow::Result<(Client, AbortOnDropHandle<()>)>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let (client, connection) = pg_config
        .connect(tls)
        .await
        .with_context(|| format!("establishing session {which_conn}"))?;
    let task = AbortOnDropHandle::new(tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Session {which_conn} terminated: {e}");
        }
    }));
    Ok((client, task))
}

fn rustls_connector() -> anyhow::Result<MakeRustlsConnect> {
    let mut roots = rustls::RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    anyhow::ensure!(
        native_certs.errors.is_empty(),
        "failed to load native TLS roots: {:?}",
        native_certs.errors
    );
    for cert in native_certs.certs {
        roots.add(cert)?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

#[async_trait]
impl ConnectionPool for ClusterPool {
    fn num_conns(&self) -> usize {
        self.conns.len()
    }

    async fn execute(&self, sql: &str, which_conn: usize) -> anyhow::Result<()> {
        let client = self.conns.get(which_conn).with_context(|| InvalidConnNum {
            index: which_conn,
            num_conns: self.conns.len(),
        })?;
        with_timeout(client.batch_execute(sql)).await
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionPool;
    use crate::testing::TestConnectionPool;

    #[test]
    fn test_validate_conn_num() -> anyhow::Result<()> {
        let pool = TestConnectionPool::new(4);
        assert_eq!(pool.validate_conn_num(None)?, 0);
        assert_eq!(pool.validate_conn_num(Some(3))?, 3);
        assert!(pool.validate_conn_num(Some(4)).is_err());
        Ok(())
    }
}
