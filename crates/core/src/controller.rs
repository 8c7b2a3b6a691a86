//! Pipeline controller
//!
//! Sequences one run over a validated [`Configuration`]:
//!
//! 1. enter the repository root (restored on every exit path)
//! 2. CI only: list related processes and stage template files
//! 3. bootstrap toolset, when requested
//! 4. acquire optimization data (restore + optimization data applies)
//! 5. one build-engine invocation for every requested engine phase
//! 6. generate optimization data (build + optimization data applies)
//! 7. test runner, for Desktop, VSI or IOperation tests
//! 8. launch the IDE without waiting for it
//!
//! Machine preparation in CI stops build processes after the run, whatever
//! the outcome.

use crate::bootstrap::build_bootstrap;
use crate::build_engine::{build_args, resolve_engine, EngineInputs};
use crate::config::Configuration;
use crate::deploy::{launch_ide, resolve_installation_dir, IdeLocator};
use crate::errors::{BuildError, Result};
use crate::http::Downloader;
use crate::hygiene::{report_related_processes, stop_build_processes, ProcessControl};
use crate::layout::RepoLayout;
use crate::observability::{phase_span, spans, step_span, TimedSpan};
use crate::optprof::{self, AcquireOutcome, FirstCandidatePolicy};
use crate::phase::Phase;
use crate::process::ToolRunner;
use crate::scope::WorkingDirGuard;
use crate::test_run::{run_tests, TestRunDeps};
use crate::tools::ToolLocations;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, Instrument};

/// Files copied from the test resources into the temp directory in CI
pub const STAGED_TEMPLATE_FILES: [&str; 5] = [
    ".editorconfig",
    "Directory.Build.props",
    "Directory.Build.targets",
    "Directory.Build.rsp",
    "NuGet.Config",
];

/// Terminal outcome of a run
#[derive(Debug)]
pub struct PipelineResult {
    pub exit_code: i32,
    pub error: Option<BuildError>,
}

impl PipelineResult {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            error: None,
        }
    }

    pub fn failure(error: BuildError) -> Self {
        Self {
            exit_code: error.exit_code(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<Result<()>> for PipelineResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(e) => Self::failure(e),
        }
    }
}

/// Stops build processes when dropped
struct MachinePreparation<'a, P: ProcessControl> {
    processes: &'a P,
}

impl<P: ProcessControl> Drop for MachinePreparation<'_, P> {
    fn drop(&mut self) {
        let stopped = stop_build_processes(self.processes);
        info!("Machine preparation stopped {} build process(es)", stopped);
    }
}

/// Copy the template files used by later test phases
pub fn stage_template_files(layout: &RepoLayout) -> Result<Vec<PathBuf>> {
    let source = layout.test_resources_dir();
    let dest = layout.temp_dir();
    fs::create_dir_all(&dest).map_err(|e| BuildError::io(&dest, e))?;

    STAGED_TEMPLATE_FILES
        .iter()
        .map(|name| {
            let from = source.join(name);
            let to = dest.join(name);
            fs::copy(&from, &to).map_err(|e| BuildError::io(&from, e))?;
            debug!("Staged {}", to.display());
            Ok(to)
        })
        .collect()
}

/// The controller and its external collaborators
pub struct Pipeline<R, P, L, D> {
    runner: R,
    processes: P,
    locator: L,
    downloader: D,
    tools: ToolLocations,
    policy: FirstCandidatePolicy,
}

impl<R, P, L, D> Pipeline<R, P, L, D>
where
    R: ToolRunner,
    P: ProcessControl,
    L: IdeLocator,
    D: Downloader,
{
    pub fn new(runner: R, processes: P, locator: L, downloader: D, tools: ToolLocations) -> Self {
        Self {
            runner,
            processes,
            locator,
            downloader,
            tools,
            policy: FirstCandidatePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FirstCandidatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run every requested phase
    pub async fn run(&self, config: &Configuration, layout: &RepoLayout) -> PipelineResult {
        let _preparation = (config.ci() && config.prepare_machine()).then(|| MachinePreparation {
            processes: &self.processes,
        });

        let outcome = async {
            let _cwd = WorkingDirGuard::enter(layout.root())?;
            self.run_phases(config, layout).await
        }
        .await;

        PipelineResult::from(outcome)
    }

    async fn run_phases(&self, config: &Configuration, layout: &RepoLayout) -> Result<()> {
        info!(
            "Pipeline: {} [{}] phases: {}",
            config.configuration(),
            config.engine(),
            config
                .phases()
                .ordered()
                .iter()
                .map(Phase::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        if config.ci() {
            report_related_processes(&self.processes);
            let span = step_span(spans::STAGE_TEMPLATES);
            let _entered = span.enter();
            stage_template_files(layout)?;
        }

        let mut apply_optimization_data = config.apply_optimization_data();

        if config.runs_build_engine() {
            let engine = resolve_engine(config.engine(), &self.locator).await?;

            let bootstrap_dir = if config.bootstrap() {
                Some(build_bootstrap(&self.runner, &engine, &self.processes, config, layout).await?)
            } else {
                None
            };

            if apply_optimization_data && config.requests(Phase::Restore) {
                let timed = TimedSpan::new(step_span(spans::OPTPROF_ACQUIRE));
                let outcome = optprof::acquire(
                    &self.runner,
                    &self.tools,
                    layout,
                    config.official(),
                    self.policy,
                )
                .instrument(timed.span().clone())
                .await?;
                if outcome == AcquireOutcome::Unavailable {
                    apply_optimization_data = false;
                }
            }

            let inputs = EngineInputs {
                bootstrap_dir,
                apply_optimization_data,
            };
            let timed = TimedSpan::new(step_span(spans::BUILD_ENGINE));
            engine
                .with_args(build_args(config, layout, &inputs))
                .exec(&self.runner)
                .instrument(timed.span().clone())
                .await?;
        }

        if apply_optimization_data && config.requests(Phase::Build) {
            let timed = TimedSpan::new(step_span(spans::OPTPROF_GENERATE));
            optprof::generate(&self.runner, &self.tools, layout, config.official())
                .instrument(timed.span().clone())
                .await?;
        }

        if config.tests().uses_test_runner() {
            let timed = TimedSpan::new(phase_span(Phase::Test));
            let deps = TestRunDeps {
                runner: &self.runner,
                processes: &self.processes,
                locator: &self.locator,
                downloader: &self.downloader,
                tools: &self.tools,
            };
            run_tests(&deps, config, layout)
                .instrument(timed.span().clone())
                .await?;
        }

        if config.requests(Phase::Launch) {
            let timed = TimedSpan::new(phase_span(Phase::Launch));
            async {
                let installation = resolve_installation_dir(&self.locator).await?;
                launch_ide(&self.runner, &installation)
            }
            .instrument(timed.span().clone())
            .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{validate, BuildConfiguration, RawFlags, Validated};
    use crate::deploy::mock::MockIdeLocator;
    use crate::http::mock::MockDownloader;
    use crate::hygiene::mock::MockProcesses;
    use crate::process::mock::MockToolRunner;
    use serial_test::serial;
    use tempfile::TempDir;

    fn configuration(flags: RawFlags) -> Configuration {
        match validate(flags).unwrap() {
            Validated::Run(config) => config,
            Validated::Help => panic!("unexpected help"),
        }
    }

    fn pipeline(
        runner: &MockToolRunner,
        processes: &MockProcesses,
        root: &std::path::Path,
    ) -> Pipeline<MockToolRunner, MockProcesses, MockIdeLocator, MockDownloader> {
        Pipeline::new(
            runner.clone(),
            processes.clone(),
            MockIdeLocator::at("/vs"),
            MockDownloader::new(),
            ToolLocations::with_packages_dir(root.join("packages")),
        )
    }

    #[test]
    fn test_stage_template_files() {
        let temp = TempDir::new().unwrap();
        let layout = RepoLayout::new(temp.path(), BuildConfiguration::Debug);
        let resources = layout.test_resources_dir();
        fs::create_dir_all(&resources).unwrap();
        for name in STAGED_TEMPLATE_FILES {
            fs::write(resources.join(name), name).unwrap();
        }

        let staged = stage_template_files(&layout).unwrap();
        assert_eq!(staged.len(), 5);
        assert_eq!(
            fs::read_to_string(layout.temp_dir().join("NuGet.Config")).unwrap(),
            "NuGet.Config"
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_no_phases_runs_nothing() {
        let temp = TempDir::new().unwrap();
        let runner = MockToolRunner::new();
        let processes = MockProcesses::new();
        let layout = RepoLayout::new(temp.path(), BuildConfiguration::Debug);

        let result = pipeline(&runner, &processes, temp.path())
            .run(&configuration(RawFlags::default()), &layout)
            .await;
        assert!(result.is_success());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_build_failure_maps_to_exit_one() {
        let temp = TempDir::new().unwrap();
        let runner = MockToolRunner::new();
        runner.set_exit_code("dotnet", 4);
        let processes = MockProcesses::new();
        let layout = RepoLayout::new(temp.path(), BuildConfiguration::Debug);
        let config = configuration(RawFlags {
            build: true,
            msbuild_engine: crate::config::BuildEngine::Dotnet,
            ..Default::default()
        });

        let result = pipeline(&runner, &processes, temp.path())
            .run(&config, &layout)
            .await;
        assert_eq!(result.exit_code, 1);
        assert!(matches!(
            result.error,
            Some(BuildError::Tool(crate::errors::ToolError::Failed { code: 4, .. }))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_prepare_machine_runs_after_failure() {
        let temp = TempDir::new().unwrap();
        let runner = MockToolRunner::new();
        let processes = MockProcesses::new();
        processes.spawn(1, "MSBuild.exe", "");
        processes.spawn(2, "notepad.exe", "");
        let layout = RepoLayout::new(temp.path(), BuildConfiguration::Debug);
        let config = configuration(RawFlags {
            ci: true,
            prepare_machine: true,
            ..Default::default()
        });

        // Template resources are absent, so staging fails.
        let result = pipeline(&runner, &processes, temp.path())
            .run(&config, &layout)
            .await;
        assert!(matches!(result.error, Some(BuildError::Io { .. })));
        assert!(!processes.is_running("MSBuild.exe"));
        assert!(processes.is_running("notepad.exe"));
    }
}
