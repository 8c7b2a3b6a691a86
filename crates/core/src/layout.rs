//! Repository directory layout
//!
//! All artifact paths are derived once from the repository root and the
//! configuration name.

use crate::config::BuildConfiguration;
use std::path::{Path, PathBuf};

/// Target framework every desktop test binary is built for
pub const DESKTOP_TFM: &str = "net472";

/// Paths of a repository checkout for one configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
    configuration: BuildConfiguration,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>, configuration: BuildConfiguration) -> Self {
        Self {
            root: root.into(),
            configuration,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.artifacts_dir().join("bin")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.artifacts_dir()
            .join("log")
            .join(self.configuration.as_str())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.artifacts_dir()
            .join("tmp")
            .join(self.configuration.as_str())
    }

    pub fn vs_setup_dir(&self) -> PathBuf {
        self.artifacts_dir()
            .join("VSSetup")
            .join(self.configuration.as_str())
    }

    /// Insertion output consumed by the profiling tool
    pub fn insertion_dir(&self) -> PathBuf {
        self.vs_setup_dir().join("Insertion")
    }

    pub fn test_results_dir(&self) -> PathBuf {
        self.artifacts_dir()
            .join("TestResults")
            .join(self.configuration.as_str())
    }

    pub fn optprof_dir(&self) -> PathBuf {
        self.artifacts_dir()
            .join("OptProf")
            .join(self.configuration.as_str())
    }

    pub fn bootstrap_dir(&self) -> PathBuf {
        self.artifacts_dir().join("Bootstrap")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.root.join(".tools")
    }

    /// Package root used when the global package cache is disabled
    pub fn local_packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Input directory for downloaded optimization data
    pub fn optimization_data_dir(&self) -> PathBuf {
        self.root.join(".o")
    }

    pub fn build_project(&self) -> PathBuf {
        self.root.join("eng").join("Build.proj")
    }

    pub fn optprof_config(&self) -> PathBuf {
        self.root.join("eng").join("config").join("OptProf.json")
    }

    /// Built location of a project's output file
    ///
    /// `file_name` is e.g. `RunTests.exe`; the project directory is the name
    /// without its extension.
    pub fn project_output_binary(&self, file_name: &str) -> PathBuf {
        let project = Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        self.bin_dir()
            .join(project)
            .join(self.configuration.as_str())
            .join(DESKTOP_TFM)
            .join(file_name)
    }

    pub fn test_runner(&self) -> PathBuf {
        self.project_output_binary("RunTests.exe")
    }

    /// Template files staged into the temp directory in CI
    pub fn test_resources_dir(&self) -> PathBuf {
        self.root
            .join("src")
            .join("Workspaces")
            .join("CoreTestUtilities")
            .join("Resources")
    }
}
