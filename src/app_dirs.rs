use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dpotd").map(|pd| pd.config_dir().join("config.json"))
    }

    /// Where the TUI writes its log so it does not draw over the screen.
    pub fn log_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            let state_dir = PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("dpotd");
            Some(state_dir.join("dpotd.log"))
        } else {
            ProjectDirs::from("", "", "dpotd")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("dpotd.log"))
        }
    }
}
