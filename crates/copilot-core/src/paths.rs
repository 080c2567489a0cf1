use std::path::PathBuf;

use anyhow::Result;

/// On-disk locations shared by the CLI and the bridge daemon.
#[derive(Debug, Clone)]
pub struct CopilotPaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub session_path: PathBuf,
    pub bridge_socket_path: PathBuf, // bridge.sock - token requests to the daemon
}

impl CopilotPaths {
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os("COPILOT_DATA_DIR") {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(dirs) = directories::ProjectDirs::from("ai", "drive-copilot", "copilot") {
            return Self::from_base(dirs.data_dir().to_path_buf());
        }
        Self::from_base(PathBuf::from(".copilot"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let config_path = base_dir.join("copilot.toml");
        let session_path = base_dir.join("session.json");
        let bridge_socket_path = base_dir.join("bridge.sock");
        Self {
            base_dir,
            config_path,
            session_path,
            bridge_socket_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}
