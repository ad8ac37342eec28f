//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout for settings, project artifacts and logs
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the projects directory
    pub fn projects_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("projects"))
    }

    /// Get the directory holding one project's artifacts
    pub fn project_dir(&self, project_id: &str) -> Dir {
        self.projects_dir().subdir(&sanitize_component(project_id))
    }

    /// Persisted interface descriptors for a project
    pub fn interfaces_file(&self, project_id: &str) -> File {
        self.project_dir(project_id).file("interfaces.json")
    }

    /// Cached compiled module for a project
    pub fn cached_wasm_file(&self, project_id: &str) -> File {
        self.project_dir(project_id).subdir("cache").file("artifact.wasm")
    }

    /// Metadata of the cached compiled module
    pub fn cached_meta_file(&self, project_id: &str) -> File {
        self.project_dir(project_id).subdir("cache").file("artifact.json")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.projects_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("SHIPYARD_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".shipyard")
            });

        Self::new(base_dir)
    }
}

/// Keep project ids from escaping the projects directory
fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

// Add dirs crate functionality inline for cross-platform support
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
