//! Platform-specific application paths.

use std::env;
use std::path::PathBuf;

use crate::defaults::CONFIG_FILE;

/// Find a configuration from standard paths.
///
/// In GNU/Linux:
///     current directory | $XDG_CONFIG_HOME/repminer | /etc/repminer
///
/// In MacOS:
///     current directory | $HOME/Library/Application Support/io.repminer.repminer | /etc/repminer
///
/// In Windows:
///     current directory | C:\Users\Alice\AppData\Roaming\repminer\repminer\config
pub fn find_config() -> Option<PathBuf> {
    let mut config_dirs = Vec::with_capacity(3);

    if let Ok(dir) = env::current_dir() {
        config_dirs.push(dir);
    }

    if let Some(dir) = directories_next::ProjectDirs::from("io", "repminer", "repminer") {
        config_dirs.push(dir.config_dir().into());
    }

    if cfg!(unix) {
        config_dirs.push("/etc/repminer".into());
    }

    config_dirs
        .into_iter()
        .map(|path| path.join(CONFIG_FILE))
        .find(|path| path.exists())
}
