//! Test run assembly and execution
//!
//! Selection and argument assembly are pure functions over discovered paths
//! so they can be exercised without a build tree. Execution is scoped: the
//! IOperation environment flag and the cleanup of leftover test workers are
//! guards released on every exit path, including a failing or panicking
//! runner.

use crate::config::{Configuration, TestFlags};
use crate::deploy::{deploy_extensions, IdeLocator};
use crate::errors::{BuildError, Result, ToolError};
use crate::http::Downloader;
use crate::hygiene::{terminate_by_prefix, ProcessControl, TEST_WORKER_PREFIX};
use crate::layout::{RepoLayout, DESKTOP_TFM};
use crate::observability::{spans, step_span, TimedSpan};
use crate::process::{exec_tool, ToolArgs, ToolRunner};
use crate::scope::EnvVarGuard;
use crate::tools::ToolLocations;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Instrument};
use walkdir::WalkDir;

pub const UNIT_TEST_SUFFIX: &str = ".UnitTests.dll";
pub const INTEGRATION_TEST_SUFFIX: &str = ".IntegrationTests.dll";
/// Workspace integration tests that only run with VSI in CI
pub const WORKSPACE_MSBUILD_TESTS: &str = "Microsoft.CodeAnalysis.Workspaces.MSBuild.UnitTests.dll";
/// Enables extra IOperation validation inside the test binaries
pub const IOPERATION_ENV: &str = "ROSLYN_TEST_IOPERATION";
pub const PROCDUMP_URL: &str = "https://download.sysinternals.com/files/Procdump.zip";
const PROCDUMP_EXE: &str = "procdump.exe";
const INTERACTIVE_HOST_MARKER: &str = "interactivehost";
const NETCORE_TRAIT: &str = "-trait:Feature=NetCore";

/// Which binaries a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    /// Unit test binaries (Desktop and IOperation runs)
    Unit,
    /// IDE integration test binaries
    Vsi,
    /// Integration test binaries restricted to the NetCore feature
    NetCoreIntegration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    X86,
    X64,
}

impl Bitness {
    pub fn runner_flag(&self) -> &'static str {
        match self {
            Bitness::X86 => "-test32",
            Bitness::X64 => "-test64",
        }
    }
}

/// Mode, bitness and IOperation checks for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestSelection {
    pub mode: TestMode,
    pub bitness: Bitness,
    pub ioperation: bool,
}

impl TestSelection {
    pub fn from_flags(flags: &TestFlags) -> Self {
        let mode = if flags.desktop || flags.ioperation {
            TestMode::Unit
        } else if flags.vsi {
            TestMode::Vsi
        } else {
            TestMode::NetCoreIntegration
        };
        let bitness = if flags.test64 {
            Bitness::X64
        } else {
            Bitness::X86
        };
        Self {
            mode,
            bitness,
            ioperation: flags.ioperation,
        }
    }

    /// File-name suffix of the binaries this mode runs
    pub fn binary_suffix(&self) -> &'static str {
        match self.mode {
            TestMode::Unit => UNIT_TEST_SUFFIX,
            TestMode::Vsi | TestMode::NetCoreIntegration => INTEGRATION_TEST_SUFFIX,
        }
    }
}

/// Multi-targeted or reference-assembly outputs never run
pub fn is_excluded(path: &Path) -> bool {
    let full = path.to_string_lossy().to_ascii_lowercase();
    full.contains("netcoreapp") || full.contains("\\ref\\") || full.contains("/ref/")
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|name| name.ends_with(&suffix.to_ascii_lowercase()))
}

/// Choose the binaries to run from everything discovered
///
/// `extra` is appended after mode selection and is still subject to the
/// universal exclusions.
pub fn select_test_binaries(
    selection: &TestSelection,
    discovered: &[PathBuf],
    extra: Option<PathBuf>,
) -> Vec<PathBuf> {
    let suffix = selection.binary_suffix();
    let skip_interactive_host =
        selection.mode == TestMode::Unit && selection.bitness != Bitness::X86;

    discovered
        .iter()
        .filter(|path| has_suffix(path, suffix))
        .filter(|path| {
            !(skip_interactive_host
                && path
                    .to_string_lossy()
                    .to_ascii_lowercase()
                    .contains(INTERACTIVE_HOST_MARKER))
        })
        .cloned()
        .chain(extra)
        .filter(|path| !is_excluded(path))
        .collect()
}

/// Every test binary of either kind under the build output tree
pub fn discover_test_binaries(bin_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !bin_dir.is_dir() {
        return Ok(found);
    }
    for entry in WalkDir::new(bin_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(bin_dir).to_path_buf();
            BuildError::io(path, std::io::Error::other(e.to_string()))
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && (has_suffix(path, UNIT_TEST_SUFFIX) || has_suffix(path, INTEGRATION_TEST_SUFFIX))
        {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Non-binary runner inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    pub results_dir: PathBuf,
    pub procdump_dir: PathBuf,
    pub use_procdump: bool,
    pub ci: bool,
}

/// Test runner arguments; the binary list always comes last
pub fn runner_args(
    selection: &TestSelection,
    options: &RunnerOptions,
    binaries: &[PathBuf],
) -> Vec<String> {
    let timeout = match selection.mode {
        TestMode::Vsi | TestMode::NetCoreIntegration => 110,
        TestMode::Unit => 90,
    };

    ToolArgs::new()
        .arg(format!("-out:{}", options.results_dir.display()))
        .arg("-nocache")
        .arg(format!("-tfm:{}", DESKTOP_TFM))
        .arg(selection.bitness.runner_flag())
        .arg(format!("-procdumppath:{}", options.procdump_dir.display()))
        .arg_if(options.use_procdump, "-useprocdump")
        .arg_if(options.ci, "-xml")
        .arg_if(options.ci, format!("-timeout:{}", timeout))
        .arg_if(selection.mode == TestMode::NetCoreIntegration, NETCORE_TRAIT)
        .extend(binaries.iter().map(|path| path.display().to_string()))
        .into_vec()
}

/// Directory holding the crash-dump tool, downloading it when needed
///
/// The well-known local install wins; otherwise the tool is kept under the
/// repository's tools directory and fetched once.
pub async fn ensure_procdump<D: Downloader + ?Sized>(
    tools: &ToolLocations,
    layout: &RepoLayout,
    downloader: &D,
) -> Result<PathBuf> {
    if tools.procdump_dir.join(PROCDUMP_EXE).is_file() {
        debug!("Using crash-dump tool at {}", tools.procdump_dir.display());
        return Ok(tools.procdump_dir.clone());
    }

    let local = layout.tools_dir().join("ProcDump");
    if local.join(PROCDUMP_EXE).is_file() {
        return Ok(local);
    }

    info!("Downloading crash-dump tool from {}", PROCDUMP_URL);
    let bytes = downloader.download(PROCDUMP_URL).await?;
    crate::archive::extract_zip_bytes(&bytes, &local, Path::new("Procdump.zip"))?;
    Ok(local)
}

/// Kills leftover test workers when dropped
struct WorkerCleanup<'a, P: ProcessControl> {
    processes: &'a P,
}

impl<P: ProcessControl> Drop for WorkerCleanup<'_, P> {
    fn drop(&mut self) {
        terminate_by_prefix(self.processes, TEST_WORKER_PREFIX);
    }
}

async fn minimize_all_windows<R: ToolRunner>(runner: &R) {
    if !cfg!(windows) {
        debug!("Window minimization skipped on this platform");
        return;
    }
    let args = ToolArgs::new()
        .arg("-NoProfile")
        .pair(
            "-Command",
            "(New-Object -ComObject Shell.Application).MinimizeAll()",
        )
        .into_vec();
    match runner.run(Path::new("powershell.exe"), &args).await {
        Ok(0) => {}
        Ok(code) => warn!("Minimizing windows exited with code {}", code),
        Err(e) => warn!("Unable to minimize windows: {}", e),
    }
}

/// External collaborators a test run needs
pub struct TestRunDeps<'a, R, P, L, D: ?Sized> {
    pub runner: &'a R,
    pub processes: &'a P,
    pub locator: &'a L,
    pub downloader: &'a D,
    pub tools: &'a ToolLocations,
}

/// Assemble and execute the test runner
pub async fn run_tests<R, P, L, D>(
    deps: &TestRunDeps<'_, R, P, L, D>,
    config: &Configuration,
    layout: &RepoLayout,
) -> Result<()>
where
    R: ToolRunner,
    P: ProcessControl,
    L: IdeLocator,
    D: Downloader + ?Sized,
{
    let timed = TimedSpan::new(step_span(spans::TEST_RUN));
    let span = timed.span().clone();

    async {
        let runner_exe = layout.test_runner();
        if !runner_exe.is_file() {
            return Err(BuildError::from(ToolError::TestRunnerMissing { path: runner_exe }));
        }

        let selection = TestSelection::from_flags(&config.tests());
        let extra = (selection.mode == TestMode::Vsi && config.ci())
            .then(|| layout.project_output_binary(WORKSPACE_MSBUILD_TESTS));
        let binaries = select_test_binaries(
            &selection,
            &discover_test_binaries(&layout.bin_dir())?,
            extra,
        );
        info!(
            "Running {} test binaries ({:?}, {:?})",
            binaries.len(),
            selection.mode,
            selection.bitness
        );

        let options = RunnerOptions {
            results_dir: layout.test_results_dir(),
            procdump_dir: ensure_procdump(deps.tools, layout, deps.downloader).await?,
            use_procdump: config.procdump(),
            ci: config.ci(),
        };
        let args = runner_args(&selection, &options, &binaries);

        if selection.mode == TestMode::Vsi {
            deploy_extensions(deps.runner, deps.locator, deps.tools, layout).await?;
            if config.ci() {
                minimize_all_windows(deps.runner).await;
            }
        }

        let _ioperation = selection
            .ioperation
            .then(|| EnvVarGuard::set(IOPERATION_ENV, "true"));
        let _cleanup = WorkerCleanup {
            processes: deps.processes,
        };

        exec_tool(deps.runner, &runner_exe, &args).await
    }
    .instrument(span)
    .await
}
