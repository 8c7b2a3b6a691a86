//! External tool locations
//!
//! Tools restored as packages are searched under the package root; each may
//! be overridden by an environment variable pointing at the executable.

use crate::errors::{Result, ToolError};
use crate::layout::RepoLayout;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const DROP_TOOL_ENV: &str = "BUILDCTL_DROP_TOOL";
pub const OPTPROF_TOOL_ENV: &str = "BUILDCTL_OPTPROF_TOOL";
pub const VSIX_INSTALLER_ENV: &str = "BUILDCTL_VSIX_INSTALLER";
pub const VSWHERE_ENV: &str = "BUILDCTL_VSWHERE";
pub const PROCDUMP_DIR_ENV: &str = "BUILDCTL_PROCDUMP_DIR";
pub const NUGET_PACKAGES_ENV: &str = "NUGET_PACKAGES";

/// Well-known local install of the crash-dump tool
#[cfg(windows)]
pub const WELL_KNOWN_PROCDUMP_DIR: &str = r"C:\Sysinternals";
#[cfg(not(windows))]
pub const WELL_KNOWN_PROCDUMP_DIR: &str = "/opt/sysinternals";

/// Where each external tool lives
#[derive(Debug, Clone, Default)]
pub struct ToolLocations {
    pub packages_dir: PathBuf,
    pub drop_tool: Option<PathBuf>,
    pub optprof_tool: Option<PathBuf>,
    pub vsix_installer: Option<PathBuf>,
    pub vswhere: Option<PathBuf>,
    pub procdump_dir: PathBuf,
    /// Per-user local application data, home of IDE extension caches
    pub local_data_dir: Option<PathBuf>,
}

impl ToolLocations {
    /// Resolve locations from the environment
    ///
    /// With `use_global_cache` the package root is `NUGET_PACKAGES` or
    /// `~/.nuget/packages`; otherwise the repository-local `packages` dir.
    pub fn from_env(layout: &RepoLayout, use_global_cache: bool) -> Self {
        let env_path = |name: &str| std::env::var_os(name).map(PathBuf::from);

        let packages_dir = if use_global_cache {
            env_path(NUGET_PACKAGES_ENV).unwrap_or_else(default_global_packages_dir)
        } else {
            layout.local_packages_dir()
        };
        debug!("Package root: {}", packages_dir.display());

        Self {
            packages_dir,
            drop_tool: env_path(DROP_TOOL_ENV),
            optprof_tool: env_path(OPTPROF_TOOL_ENV),
            vsix_installer: env_path(VSIX_INSTALLER_ENV),
            vswhere: env_path(VSWHERE_ENV),
            procdump_dir: env_path(PROCDUMP_DIR_ENV)
                .unwrap_or_else(|| PathBuf::from(WELL_KNOWN_PROCDUMP_DIR)),
            local_data_dir: directories_next::BaseDirs::new()
                .map(|dirs| dirs.data_local_dir().to_path_buf()),
        }
    }

    /// Locations rooted at a package directory, no overrides
    pub fn with_packages_dir(packages_dir: impl Into<PathBuf>) -> Self {
        Self {
            packages_dir: packages_dir.into(),
            procdump_dir: PathBuf::from(WELL_KNOWN_PROCDUMP_DIR),
            ..Default::default()
        }
    }

    /// Artifact-service client
    pub fn drop_tool(&self) -> Result<PathBuf> {
        self.resolve(&self.drop_tool, "drop.app", "drop.exe")
    }

    /// Profiling-data generator
    pub fn optprof_tool(&self) -> Result<PathBuf> {
        self.resolve(&self.optprof_tool, "roslyntools.optprof", "roslyn.optprof.exe")
    }

    pub fn vsix_installer(&self) -> Result<PathBuf> {
        self.resolve(
            &self.vsix_installer,
            "roslyntools.vsixexpinstaller",
            "VsixExpInstaller.exe",
        )
    }

    pub fn vswhere(&self) -> Result<PathBuf> {
        self.resolve(&self.vswhere, "vswhere", "vswhere.exe")
    }

    fn resolve(&self, explicit: &Option<PathBuf>, package: &str, file: &str) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(ToolError::Missing { path: path.clone() }.into())
            };
        }

        let package_dir = self.packages_dir.join(package);
        find_in_package(&package_dir, file).ok_or_else(|| {
            ToolError::Missing {
                path: package_dir.join(file),
            }
            .into()
        })
    }
}

fn default_global_packages_dir() -> PathBuf {
    directories_next::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".nuget").join("packages"))
        .unwrap_or_else(|| PathBuf::from(".nuget").join("packages"))
}

/// Find `file` anywhere under a package directory
///
/// Package directories hold one subdirectory per version; when several
/// versions carry the file, the lexically greatest path wins.
pub fn find_in_package(package_dir: &Path, file: &str) -> Option<PathBuf> {
    if !package_dir.is_dir() {
        return None;
    }

    WalkDir::new(package_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.eq_ignore_ascii_case(file))
        })
        .map(|entry| entry.into_path())
        .max()
}
