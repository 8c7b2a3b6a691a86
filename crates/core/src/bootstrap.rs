//! Bootstrap compiler build
//!
//! Packs the compiler toolset with the build engine, unpacks the produced
//! package and stops any compiler server so the main build runs against the
//! freshly built toolset.

use crate::archive::extract_zip_file;
use crate::build_engine::{base_switches, binary_log_switch};
use crate::config::Configuration;
use crate::errors::{BuildError, DiscoveryError, Result};
use crate::hygiene::{stop_compiler_server, ProcessControl};
use crate::layout::RepoLayout;
use crate::observability::{spans, step_span, TimedSpan};
use crate::process::{Invocation, ToolArgs, ToolRunner};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Instrument};

/// Toolset package project, relative to the repository root
pub const TOOLSET_PROJECT: &str =
    "src/NuGet/Microsoft.Net.Compilers.Toolset/Microsoft.Net.Compilers.Toolset.Package.csproj";
/// File-name prefix of the produced package
pub const TOOLSET_PACKAGE_PREFIX: &str = "Microsoft.Net.Compilers.Toolset";

/// Build engine arguments that pack the toolset
pub fn bootstrap_args(config: &Configuration, layout: &RepoLayout) -> Vec<String> {
    ToolArgs::new()
        .path(layout.root().join(TOOLSET_PROJECT))
        .extend(base_switches(config).into_vec())
        .arg("/restore")
        .arg("/t:Pack")
        .arg_if(config.binary_log(), binary_log_switch(layout, "Bootstrap.binlog"))
        .property("Configuration", config.bootstrap_configuration())
        .property("RepoRoot", layout.root().display())
        .property("ContinuousIntegrationBuild", config.ci())
        .property("UseRoslynAnalyzers", false)
        .property("PackageOutputPath", layout.bootstrap_dir().display())
        .into_vec()
}

/// The packed toolset in `dir`
pub fn find_toolset_package(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir).map_err(|e| BuildError::io(dir, e))?;
    let mut packages = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| BuildError::io(dir, e))?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| {
                name.starts_with(TOOLSET_PACKAGE_PREFIX) && name.ends_with(".nupkg")
            });
        if matches {
            packages.push(path);
        }
    }
    packages.sort();
    packages.pop().ok_or_else(|| {
        DiscoveryError::PackageMissing {
            path: dir.join(format!("{}.*.nupkg", TOOLSET_PACKAGE_PREFIX)),
        }
        .into()
    })
}

/// Build the bootstrap toolset, returning the directory to build with
pub async fn build_bootstrap<R: ToolRunner, P: ProcessControl>(
    runner: &R,
    engine: &Invocation,
    processes: &P,
    config: &Configuration,
    layout: &RepoLayout,
) -> Result<PathBuf> {
    let timed = TimedSpan::new(step_span(spans::BOOTSTRAP));
    let span = timed.span().clone();

    async {
        let bootstrap_dir = layout.bootstrap_dir();
        if bootstrap_dir.exists() {
            fs::remove_dir_all(&bootstrap_dir).map_err(|e| BuildError::io(&bootstrap_dir, e))?;
        }
        fs::create_dir_all(&bootstrap_dir).map_err(|e| BuildError::io(&bootstrap_dir, e))?;

        info!(
            "Building bootstrap toolset ({})",
            config.bootstrap_configuration()
        );
        engine
            .clone()
            .with_args(bootstrap_args(config, layout))
            .exec(runner)
            .await?;

        let package = find_toolset_package(&bootstrap_dir)?;
        let toolset = bootstrap_dir.join("toolset");
        extract_zip_file(&package, &toolset)?;

        let stopped = stop_compiler_server(processes);
        info!(
            "Bootstrap toolset ready at {} ({} compiler server(s) stopped)",
            toolset.display(),
            stopped
        );
        Ok::<_, BuildError>(toolset)
    }
    .instrument(span)
    .await
}
