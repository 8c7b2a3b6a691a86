//! IDE discovery and extension deployment
//!
//! Deployment locates one IDE installation, clears the per-instance
//! extension cache of the isolated `RoslynDev` profile and installs the built
//! extension packages one at a time in [`DEPLOYMENT_ORDER`]. Later packages
//! depend on earlier ones being registered, so the order never follows
//! discovery or name order.

use crate::errors::{BuildError, DiscoveryError, Result};
use crate::layout::RepoLayout;
use crate::observability::{spans, step_span, TimedSpan};
use crate::process::{exec_tool, exec_tool_captured, ToolArgs, ToolRunner};
use crate::tools::ToolLocations;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Instrument};

/// Isolated IDE profile used for development deployments
pub const ROOT_SUFFIX: &str = "RoslynDev";

/// Extension packages in install order
pub const DEPLOYMENT_ORDER: [&str; 7] = [
    "Roslyn.Compilers.Extension.vsix",
    "Roslyn.VisualStudio.Setup.vsix",
    "Roslyn.VisualStudio.Setup.Dependencies.vsix",
    "Roslyn.VisualStudio.InteractiveComponents.vsix",
    "ExpressionEvaluatorPackage.vsix",
    "Roslyn.VisualStudio.DiagnosticsWindow.vsix",
    "Microsoft.VisualStudio.IntegrationTest.Setup.vsix",
];

/// Environment variable naming the IDE installation in a developer shell
pub const VS_INSTALL_DIR_ENV: &str = "VSINSTALLDIR";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdeCatalog {
    #[serde(rename = "productDisplayVersion")]
    pub product_display_version: String,
}

/// One installation reported by the discovery tool
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeInstance {
    pub instance_id: String,
    pub installation_path: PathBuf,
    pub installation_version: String,
    #[serde(default)]
    pub catalog: Option<IdeCatalog>,
}

impl IdeInstance {
    /// Leading component of the installation version
    pub fn major_version(&self) -> Result<u32> {
        self.installation_version
            .split('.')
            .next()
            .and_then(|major| major.parse().ok())
            .ok_or_else(|| {
                DiscoveryError::Parsing {
                    message: format!(
                        "invalid installation version '{}'",
                        self.installation_version
                    ),
                }
                .into()
            })
    }
}

/// IDE executable under an installation directory
pub fn devenv_path(installation: &Path) -> PathBuf {
    installation.join("Common7").join("IDE").join("devenv.exe")
}

/// IDE installation directory: the developer-shell variable when set,
/// otherwise the located instance
pub async fn resolve_installation_dir<L: IdeLocator>(locator: &L) -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(VS_INSTALL_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    Ok(locator.locate().await?.installation_path)
}

/// Parse the discovery tool's JSON output
pub fn parse_instances(json: &str) -> Result<Vec<IdeInstance>> {
    serde_json::from_str(json).map_err(|e| {
        DiscoveryError::Parsing {
            message: e.to_string(),
        }
        .into()
    })
}

/// Locates the host IDE installation
#[allow(async_fn_in_trait)]
pub trait IdeLocator {
    async fn locate(&self) -> Result<IdeInstance>;
}

impl<T: IdeLocator> IdeLocator for &T {
    async fn locate(&self) -> Result<IdeInstance> {
        (*self).locate().await
    }
}

/// Locator backed by the `vswhere` discovery tool
#[derive(Debug, Clone)]
pub struct VsWhereLocator<R> {
    runner: R,
    tools: ToolLocations,
}

impl<R: ToolRunner> VsWhereLocator<R> {
    pub fn new(runner: R, tools: ToolLocations) -> Self {
        Self { runner, tools }
    }
}

impl<R: ToolRunner> IdeLocator for VsWhereLocator<R> {
    async fn locate(&self) -> Result<IdeInstance> {
        let vswhere = self.tools.vswhere()?;
        let args = ToolArgs::new()
            .arg("-latest")
            .arg("-prerelease")
            .pair("-format", "json")
            .into_vec();
        let stdout = exec_tool_captured(&self.runner, &vswhere, &args).await?;
        let instance = parse_instances(&stdout)?
            .into_iter()
            .next()
            .ok_or(DiscoveryError::IdeNotFound)?;
        info!(
            "Using IDE instance {} at {}",
            instance.instance_id,
            instance.installation_path.display()
        );
        Ok(instance)
    }
}

/// Per-instance extension cache of the development profile
pub fn extension_cache_dir(local_data: &Path, instance: &IdeInstance) -> Result<PathBuf> {
    Ok(local_data
        .join("Microsoft")
        .join("VisualStudio")
        .join(format!(
            "{}.0_{}{}",
            instance.major_version()?,
            instance.instance_id,
            ROOT_SUFFIX
        )))
}

/// Remove an extension cache, returning the package directories it held
pub fn remove_extension_cache(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut packages = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| BuildError::io(dir, e))? {
        let entry = entry.map_err(|e| BuildError::io(dir, e))?;
        if entry.path().is_dir() {
            packages.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    packages.sort();
    for package in &packages {
        info!("Removing cached extension: {}", package);
    }

    fs::remove_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
    Ok(packages)
}

/// Extension packages present in a setup output directory
pub fn discover_packages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut packages = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| BuildError::io(dir, e))? {
        let path = entry.map_err(|e| BuildError::io(dir, e))?.path();
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("vsix"))
        {
            packages.push(path);
        }
    }
    Ok(packages)
}

/// Order discovered packages by [`DEPLOYMENT_ORDER`]
///
/// Packages outside the declared sequence are ignored; a declared package
/// that was not discovered is an error.
pub fn plan_installs(discovered: &[PathBuf]) -> Result<Vec<PathBuf>> {
    DEPLOYMENT_ORDER
        .iter()
        .map(|name| {
            discovered
                .iter()
                .find(|path| {
                    path.file_name()
                        .and_then(|file| file.to_str())
                        .is_some_and(|file| file.eq_ignore_ascii_case(name))
                })
                .cloned()
                .ok_or_else(|| {
                    BuildError::from(DiscoveryError::PackageMissing {
                        path: PathBuf::from(name),
                    })
                })
        })
        .collect()
}

/// Installer arguments for one package
pub fn installer_args(instance: &IdeInstance, package: &Path) -> Vec<String> {
    ToolArgs::new()
        .arg(format!("/rootSuffix:{}", ROOT_SUFFIX))
        .arg(format!("/vsInstallDir:{}", instance.installation_path.display()))
        .path(package)
        .into_vec()
}

/// Deploy every extension package into the located IDE instance
pub async fn deploy_extensions<R: ToolRunner, L: IdeLocator>(
    runner: &R,
    locator: &L,
    tools: &ToolLocations,
    layout: &RepoLayout,
) -> Result<IdeInstance> {
    let timed = TimedSpan::new(step_span(spans::EXTENSION_DEPLOY));
    let span = timed.span().clone();

    async {
        let instance = locator.locate().await?;

        let local_data = tools
            .local_data_dir
            .as_deref()
            .ok_or(DiscoveryError::LocalDataDirUnknown)?;
        let cache = extension_cache_dir(local_data, &instance)?;
        let removed = remove_extension_cache(&cache)?;
        info!(
            "Cleared extension cache {} ({} package(s))",
            cache.display(),
            removed.len()
        );

        let installer = tools.vsix_installer()?;
        let packages = plan_installs(&discover_packages(&layout.vs_setup_dir())?)?;
        for package in &packages {
            info!("Installing {}", package.display());
            exec_tool(runner, &installer, &installer_args(&instance, package)).await?;
        }

        Ok::<_, BuildError>(instance)
    }
    .instrument(span)
    .await
}

/// Start the IDE in the development profile without waiting for it
pub fn launch_ide<R: ToolRunner>(runner: &R, installation: &Path) -> Result<()> {
    let args = ToolArgs::new()
        .pair("/rootSuffix", ROOT_SUFFIX)
        .into_vec();
    runner.spawn_detached(&devenv_path(installation), &args)
}

pub mod mock {
    //! Fixed-answer IDE locator

    use super::{IdeInstance, IdeLocator};
    use crate::errors::{DiscoveryError, Result};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    pub struct MockIdeLocator {
        instance: Option<IdeInstance>,
        lookups: Arc<Mutex<usize>>,
    }

    impl MockIdeLocator {
        /// Locator that finds nothing
        pub fn empty() -> Self {
            Self::default()
        }

        pub fn with_instance(instance: IdeInstance) -> Self {
            Self {
                instance: Some(instance),
                lookups: Arc::default(),
            }
        }

        /// Instance with the given install directory and version 16.0
        pub fn at(installation_path: impl Into<PathBuf>) -> Self {
            Self::with_instance(IdeInstance {
                instance_id: "abc123".to_string(),
                installation_path: installation_path.into(),
                installation_version: "16.0.28729.10".to_string(),
                catalog: None,
            })
        }

        pub fn lookups(&self) -> usize {
            *self.lookups.lock().unwrap()
        }
    }

    impl IdeLocator for MockIdeLocator {
        async fn locate(&self) -> Result<IdeInstance> {
            *self.lookups.lock().unwrap() += 1;
            self.instance
                .clone()
                .ok_or_else(|| DiscoveryError::IdeNotFound.into())
        }
    }
}
