use chrono::Utc;
use slog::Drain;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

/// Colored, async logger for interactive runs.
pub fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

/// Plain-text logger writing to `{directory}/{name}_{utc timestamp}.log`. The directory must
/// exist.
pub fn create_root_logger_for_file(directory: &Path, name: &str) -> Result<slog::Logger, io::Error> {
    let now = Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
    let log_path = directory.join(format!("{}_{}.log", name, now));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!()))
}

/// Logger that drops everything.
pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
