//! Execution log files
//!
//! A client's log lives at `<output_dir>/<host>_<port>.txt`. It is written
//! once, atomically: the text goes to `<host>_<port>.txt.tmp`, is fsynced, and
//! is then hard-linked into place, so a reader never sees a partial log and
//! an existing log is never replaced.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::entry::ExecutionLog;
use super::ClientLogFormat;
use crate::error::{HarnessError, Result};
use crate::model::NodeAddress;

/// Path of the log a client writes into `dir`
pub fn log_path(dir: &Path, client: &NodeAddress) -> PathBuf {
    dir.join(format!("{}.txt", client.file_stem()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Persist a client's log. Fails if the log already exists.
pub fn write_log(dir: &Path, client: &NodeAddress, log: &ExecutionLog) -> Result<PathBuf> {
    let path = log_path(dir, client);
    if path.exists() {
        return Err(HarnessError::LogAlreadyWritten { path });
    }

    let temp = temp_path(&path);
    let mut file = File::create(&temp).map_err(|e| HarnessError::io(&temp, e))?;
    file.write_all(log.to_text().as_bytes())
        .map_err(|e| HarnessError::io(&temp, e))?;
    file.sync_all().map_err(|e| HarnessError::io(&temp, e))?;
    drop(file);

    publish(&temp, &path)?;

    debug!(client = %client, path = %path.display(), entries = log.len(), "execution log written");
    Ok(path)
}

/// Link the finished temp file into place. Unlike a rename, linking fails
/// when another writer got there first.
fn publish(temp: &Path, path: &Path) -> Result<()> {
    let linked = fs::hard_link(temp, path);
    if let Err(e) = fs::remove_file(temp) {
        warn!(path = %temp.display(), error = %e, "failed to remove temporary log");
    }
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(HarnessError::LogAlreadyWritten {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(HarnessError::io(path, e)),
    }
}

/// Read and parse a log file in whichever format it was written
pub fn read_log(path: &Path) -> Result<ExecutionLog> {
    read_log_as(path, ClientLogFormat::Auto)
}

pub fn read_log_as(path: &Path, format: ClientLogFormat) -> Result<ExecutionLog> {
    let text = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
    format.parse(&text).map_err(|(line, reason)| HarnessError::MalformedLog {
        path: path.to_path_buf(),
        line,
        reason,
    })
}
