use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.todosync/`, shared with the settings file.
pub fn todosync_root(home: &Path) -> PathBuf {
    todosync_core::config::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    todosync_root(home).join(DAEMON_SOCKET)
}
