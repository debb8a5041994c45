// src/infra/paths.rs — Config path resolution
//
// EPHEMERA_HOME overrides everything. Otherwise config lives in ~/.ephemera/.
// Sessions are memory-only, so there is no data directory.

use std::path::PathBuf;

fn ephemera_home() -> Option<PathBuf> {
    std::env::var_os("EPHEMERA_HOME").map(PathBuf::from)
}

/// Configuration directory: $EPHEMERA_HOME/ or ~/.ephemera/
pub fn config_dir() -> Option<PathBuf> {
    if let Some(home) = ephemera_home() {
        return Some(home);
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".ephemera"))
}

/// Path of config.toml, if a home directory could be determined.
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
