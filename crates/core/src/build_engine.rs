//! Build engine invocation
//!
//! A single invocation carries every requested build-engine phase as a
//! property, rather than one invocation per phase.

use crate::config::{BuildEngine, Configuration};
use crate::deploy::{resolve_installation_dir, IdeLocator};
use crate::errors::Result;
use crate::layout::RepoLayout;
use crate::phase::Phase;
use crate::process::{Invocation, ToolArgs};
use std::path::{Path, PathBuf};

/// Target frameworks of CoreClr test runs
pub const CORECLR_TEST_FRAMEWORKS: &str = "netcoreapp2.1";

/// Inputs prepared by earlier pipeline steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInputs {
    /// Toolset produced by the bootstrap build
    pub bootstrap_dir: Option<PathBuf>,
    /// Whether acquired optimization data feeds this build
    pub apply_optimization_data: bool,
}

/// Common switches every invocation starts with
pub fn base_switches(config: &Configuration) -> ToolArgs {
    ToolArgs::new()
        .arg("/m")
        .arg("/nologo")
        .arg("/clp:Summary")
        .arg(format!("/v:{}", config.verbosity().switch_value()))
}

/// `/bl:` switch for a named binary log
pub fn binary_log_switch(layout: &RepoLayout, name: &str) -> String {
    format!("/bl:{}", layout.log_dir().join(name).display())
}

/// Arguments of the main build invocation
pub fn build_args(config: &Configuration, layout: &RepoLayout, inputs: &EngineInputs) -> Vec<String> {
    let requested = |phase: Phase| config.requests(phase);

    let mut args = ToolArgs::new()
        .path(layout.build_project())
        .extend(base_switches(config).into_vec())
        .arg_if(config.binary_log(), binary_log_switch(layout, "Build.binlog"))
        .property("Configuration", config.configuration())
        .property("RepoRoot", layout.root().display())
        .property("Restore", requested(Phase::Restore))
        .property("Build", requested(Phase::Build))
        .property("Test", config.tests().core_clr)
        .property("Rebuild", requested(Phase::Rebuild))
        .property("Pack", requested(Phase::Pack))
        .property("Sign", requested(Phase::Sign))
        .property("Publish", requested(Phase::Publish))
        .property("ContinuousIntegrationBuild", config.ci())
        .property(
            "OfficialBuildId",
            config.official().build_id.as_deref().unwrap_or_default(),
        )
        .property("UseRoslynAnalyzers", config.run_analyzers())
        .property("TreatWarningsAsErrors", true)
        .property("VisualStudioDropName", &config.official().vs_drop_name)
        .property("VisualStudioBranchName", &config.official().vs_branch)
        .property("EnablePartialNgenOptimization", inputs.apply_optimization_data);

    if inputs.apply_optimization_data {
        args = args.property(
            "IbcOptimizationDataDir",
            layout.optimization_data_dir().display(),
        );
    }
    if let Some(dir) = &inputs.bootstrap_dir {
        args = args.property("BootstrapBuildPath", dir.display());
    }
    if config.tests().core_clr {
        args = args.property("TestTargetFrameworks", CORECLR_TEST_FRAMEWORKS);
    }
    if !config.deploy_extensions() {
        args = args.property("DeployExtension", false);
    }
    if !config.use_global_nuget_cache() {
        args = args.property("RestorePackagesPath", layout.local_packages_dir().display());
    }

    args.arg_if(config.warn_as_error(), "/warnAsError")
        .extend(config.properties().iter().cloned())
        .into_vec()
}

/// IDE-native engine under an installation directory
pub fn ide_msbuild_path(installation: &Path) -> PathBuf {
    installation
        .join("MSBuild")
        .join("Current")
        .join("Bin")
        .join("MSBuild.exe")
}

/// Resolve the executable (and launcher arguments) for the chosen engine
pub async fn resolve_engine<L: IdeLocator>(engine: BuildEngine, locator: &L) -> Result<Invocation> {
    match engine {
        BuildEngine::Dotnet => Ok(Invocation::new("dotnet").with_args(["msbuild"])),
        BuildEngine::Vs => {
            let installation = resolve_installation_dir(locator).await?;
            Ok(Invocation::new(ide_msbuild_path(&installation)))
        }
    }
}
