//! Session logger: writes pipeline log output to a single file.
//!
//! The file is **truncated (overwritten) at each `init`**, so it only ever
//! contains output from the most-recent session.  The location is chosen by
//! the composition root (see [`crate::project::Project`]); the library never
//! probes the environment for it.
//!
//! Usage — anywhere in the crate use the `log_info!` / `log_warn!` / `log_err!`
//! macros, or call `crate::logger::write_line(...)` directly.  Until `init`
//! has been called every log call is a silent no-op, so unit tests and
//! embedders that do not care about logging need no setup.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// True once `init` has opened a log file.
pub fn is_enabled() -> bool {
    LOG_FILE.get().is_some()
}

/// Write a line to the session log.  Silently ignores I/O errors so that
/// logging never breaks the pipeline.
pub fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Write a timestamped, level-tagged line to the session log.
pub fn write(level: &str, msg: &str) {
    if !is_enabled() {
        return;
    }
    let ts = timestamp();
    write_line(&format!("[{}] [{}] {}", ts, level, msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*))
    };
}

/// Initialise the session logger at `path`.
///
/// * Creates the parent directory and creates (or truncates) the log file.
/// * Only the first successful call takes effect; later calls return the
///   path that is already active.
pub fn init(path: &Path) -> std::io::Result<&'static PathBuf> {
    if let Some(existing) = LOG_PATH.get() {
        return Ok(existing);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let _ = LOG_FILE.set(Mutex::new(file));
    let active = LOG_PATH.get_or_init(|| path.to_path_buf());

    write_line(&format!(
        "=== DecalFE session started {} ===",
        human_timestamp()
    ));
    write_line(&format!("Log file: {}", active.display()));
    write_line("");

    Ok(active)
}

/// Simple seconds-since-epoch timestamp string.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            // HH:MM:SS within the current day (UTC)
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}", h, m, s)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

/// Human-readable date-time for the session header.
fn human_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
