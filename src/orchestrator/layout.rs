//! On-disk inputs and outputs of a run
//!
//! ```text
//! <input_dir>/init.txt                          topology descriptor
//! <input_dir>/client_inputs/<host>_<port>       one script per client
//! <output_dir>/<host>_<port>.txt                one log per client
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::config::PathsConfig;
use crate::error::{HarnessError, Result};
use crate::model::{InstructionScript, NodeAddress, Topology};

/// Write the topology and every client script to their expected locations
pub fn write_inputs(
    paths: &PathsConfig,
    topology: &Topology,
    scripts: &BTreeMap<NodeAddress, InstructionScript>,
) -> Result<()> {
    let scripts_dir = paths.scripts_dir();
    fs::create_dir_all(&scripts_dir).map_err(|e| HarnessError::io(&scripts_dir, e))?;

    let init = paths.init_file();
    fs::write(&init, topology.to_string()).map_err(|e| HarnessError::io(&init, e))?;
    debug!(path = %init.display(), "topology written");

    for (client, script) in scripts {
        let path = paths.script_path(client);
        fs::write(&path, script.to_string()).map_err(|e| HarnessError::io(&path, e))?;
        debug!(client = %client, path = %path.display(), "script written");
    }
    Ok(())
}

/// Remove and recreate the output directory so stale logs cannot be read
pub fn reset_output_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(HarnessError::io(dir, e)),
    }
    fs::create_dir_all(dir).map_err(|e| HarnessError::io(dir, e))?;
    info!(path = %dir.display(), "output directory reset");
    Ok(())
}

/// Read back the topology and the scripts of every client it names
pub fn read_inputs(paths: &PathsConfig) -> Result<(Topology, BTreeMap<NodeAddress, InstructionScript>)> {
    let topology = read_topology(&paths.init_file())?;
    let scripts = read_scripts(&paths.scripts_dir(), &topology)?;
    Ok((topology, scripts))
}

pub fn read_topology(path: &Path) -> Result<Topology> {
    let text = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
    Topology::parse(&text)
}

/// Read `<dir>/<host>_<port>` for every client. Parse errors name the file.
pub fn read_scripts(dir: &Path, topology: &Topology) -> Result<BTreeMap<NodeAddress, InstructionScript>> {
    let mut scripts = BTreeMap::new();
    for client in topology.clients() {
        let path = dir.join(client.file_stem());
        let text = fs::read_to_string(&path).map_err(|e| HarnessError::io(&path, e))?;
        let script = InstructionScript::parse(&text).map_err(|e| match e {
            HarnessError::MalformedInstructionScript { line, reason } => {
                HarnessError::MalformedInstructionScript {
                    line,
                    reason: format!("{}: {}", path.display(), reason),
                }
            }
            other => other,
        })?;
        scripts.insert(client.clone(), script);
    }
    Ok(scripts)
}
