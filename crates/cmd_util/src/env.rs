use std::{
    env,
    fmt::Debug,
    fs::File,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    sync::OnceLock,
};

use tracing::Level;
use tracing_subscriber::{
    fmt::format::format,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

static LOG_FILE_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Path of the on-disk restore log, if one was configured at startup.
/// End-of-batch error summaries point operators here for the full list of
/// failed statements.
pub fn log_file_path() -> Option<&'static Path> {
    LOG_FILE_PATH.get().map(|p| p.as_path())
}

/// Guard object. Hold onto it for as long as the process should keep flushing
/// buffered log lines to the file passed to `config_tool`.
pub struct TracingGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Call this from binaries at startup. Terminal output goes to stderr at
/// ERROR unless RUST_LOG says otherwise; when `log_file` is given, the full
/// DEBUG stream (including per-statement failure detail) is also appended
/// there.
pub fn config_tool(log_file: Option<&Path>) -> TracingGuard {
    let mut layers = Vec::new();
    let color_disabled = env::var("NO_COLOR").is_ok();
    let format_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!color_disabled)
        .with_writer(std::io::stderr)
        .event_format(format().compact())
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(Level::ERROR.as_str())),
        )
        .boxed();
    layers.push(format_layer);

    let guard = log_file.map(|path| {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .unwrap_or_else(|e| panic!("Could not open log file {}: {e}", path.display()));
        let _ = LOG_FILE_PATH.set(path.to_owned());
        let (file_writer, guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(EnvFilter::new(Level::DEBUG.as_str()))
            .boxed();
        layers.push(file_layer);
        guard
    });
    tracing_subscriber::registry().with(layers).init();

    TracingGuard { _guard: guard }
}

pub fn config_test() {
    // Try to initialize tracing_subscriber. Ok if it fails - probably
    // means it was initialized already by another test in the process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
