use anyhow::Result;
use buildctl_core::config::{BuildConfiguration, BuildEngine, RawFlags, Verbosity};
use buildctl_core::controller::Pipeline;
use buildctl_core::deploy::VsWhereLocator;
use buildctl_core::errors::{BuildError, ConfigError, InternalError};
use buildctl_core::http::ReqwestDownloader;
use buildctl_core::hygiene::SystemProcesses;
use buildctl_core::process::CliToolRunner;
use buildctl_core::tools::ToolLocations;
use buildctl_core::{validate, Configuration, PipelineResult, RepoLayout, Validated};
use clap::{CommandFactory, Parser, ValueEnum};
use futures::FutureExt;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{debug, error};

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Build pipeline controller",
    long_about = "Build pipeline controller\n\nValidates build flags and drives restore, build, test, optimization data and IDE extension deployment through their external tools.",
    disable_help_flag = true,
    color = clap::ColorChoice::Auto
)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via BUILDCTL_LOG_FORMAT env var)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Repository root (defaults to the current directory)
    #[arg(long, value_name = "PATH", alias = "repoRoot")]
    pub repo_root: Option<PathBuf>,

    /// Build configuration (Debug or Release)
    #[arg(short = 'c', long, default_value = "Debug")]
    pub configuration: BuildConfiguration,

    /// Build engine verbosity: q[uiet], m[inimal], n[ormal], d[etailed], diag[nostic]
    #[arg(short = 'v', long, default_value = "minimal")]
    pub verbosity: Verbosity,

    /// Build engine (vs or dotnet)
    #[arg(long, alias = "msbuildEngine", default_value = "vs")]
    pub msbuild_engine: BuildEngine,

    /// Restore packages
    #[arg(short = 'r', long)]
    pub restore: bool,

    /// Build the solution
    #[arg(short = 'b', long)]
    pub build: bool,

    /// Rebuild the solution
    #[arg(long)]
    pub rebuild: bool,

    /// Sign build outputs
    #[arg(long)]
    pub sign: bool,

    /// Create packages
    #[arg(long)]
    pub pack: bool,

    /// Publish build artifacts
    #[arg(long)]
    pub publish: bool,

    /// Launch the IDE with the deployed extensions
    #[arg(long)]
    pub launch: bool,

    /// Print usage and exit
    #[arg(short = 'h', long)]
    pub help: bool,

    /// Build with a freshly built bootstrap compiler
    #[arg(long)]
    pub bootstrap: bool,

    /// Configuration of the bootstrap compiler
    #[arg(long, alias = "bootstrapConfiguration", default_value = "Release")]
    pub bootstrap_configuration: BuildConfiguration,

    /// Write a binary build log
    #[arg(long, visible_alias = "bl", alias = "binaryLog")]
    pub binary_log: bool,

    /// Running in continuous integration
    #[arg(long)]
    pub ci: bool,

    /// Capture crash dumps during test runs
    #[arg(long)]
    pub procdump: bool,

    /// Do not run analyzers during the build
    #[arg(long, alias = "skipAnalyzers")]
    pub skip_analyzers: bool,

    /// Deploy IDE extensions after the build
    #[arg(short = 'd', long, alias = "deployExtensions")]
    pub deploy_extensions: bool,

    /// Stop build processes after a CI run
    #[arg(long, alias = "prepareMachine")]
    pub prepare_machine: bool,

    /// Restore into the global package cache (true or false)
    #[arg(
        long,
        alias = "useGlobalNuGetCache",
        value_name = "BOOL",
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    pub use_global_nuget_cache: bool,

    /// Treat warnings as errors
    #[arg(long, alias = "warnAsError")]
    pub warn_as_error: bool,

    /// Official build id
    #[arg(long, alias = "officialBuildId", value_name = "ID")]
    pub official_build_id: Option<String>,

    /// Drop name for the IDE insertion (official builds)
    #[arg(long, alias = "vsDropName", value_name = "NAME")]
    pub vs_drop_name: Option<String>,

    /// Branch of the IDE insertion (official builds)
    #[arg(long, alias = "vsBranch", value_name = "BRANCH")]
    pub vs_branch: Option<String>,

    /// Access token for the artifact service (official builds)
    #[arg(long, alias = "vsDropAccessToken", value_name = "TOKEN")]
    pub vs_drop_access_token: Option<String>,

    /// Run 32-bit desktop tests
    #[arg(long)]
    pub test32: bool,

    /// Run 64-bit desktop tests
    #[arg(long)]
    pub test64: bool,

    /// Run IDE integration tests
    #[arg(long, alias = "testVsi")]
    pub test_vsi: bool,

    /// Run desktop unit tests
    #[arg(long, visible_alias = "test", alias = "testDesktop")]
    pub test_desktop: bool,

    /// Run CoreClr unit tests
    #[arg(long, alias = "testCoreClr")]
    pub test_core_clr: bool,

    /// Run unit tests with IOperation validation
    #[arg(long, alias = "testIOperation")]
    pub test_ioperation: bool,

    /// Pass-through build engine properties (/p:Name=Value)
    #[arg(value_name = "PROPERTIES")]
    pub properties: Vec<String>,
}

impl Cli {
    /// The flags as the validator sees them
    pub fn into_flags(self) -> RawFlags {
        RawFlags {
            configuration: self.configuration,
            verbosity: self.verbosity,
            msbuild_engine: self.msbuild_engine,
            restore: self.restore,
            build: self.build,
            rebuild: self.rebuild,
            sign: self.sign,
            pack: self.pack,
            publish: self.publish,
            launch: self.launch,
            help: self.help,
            bootstrap: self.bootstrap,
            bootstrap_configuration: self.bootstrap_configuration,
            binary_log: self.binary_log,
            ci: self.ci,
            procdump: self.procdump,
            skip_analyzers: self.skip_analyzers,
            deploy_extensions: self.deploy_extensions,
            prepare_machine: self.prepare_machine,
            use_global_nuget_cache: self.use_global_nuget_cache,
            warn_as_error: self.warn_as_error,
            official_build_id: self.official_build_id,
            vs_drop_name: self.vs_drop_name,
            vs_branch: self.vs_branch,
            vs_drop_access_token: self.vs_drop_access_token,
            test32: self.test32,
            test64: self.test64,
            test_vsi: self.test_vsi,
            test_desktop: self.test_desktop,
            test_core_clr: self.test_core_clr,
            test_ioperation: self.test_ioperation,
            properties: self.properties,
        }
    }

    /// Validate, run the pipeline and return the process exit code
    pub async fn dispatch(self) -> Result<i32> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };

        if std::env::var_os("BUILDCTL_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
            let level = self.log_level.as_str();
            std::env::set_var("RUST_LOG", format!("buildctl={},buildctl_core={}", level, level));
        }
        buildctl_core::logging::init(log_format)?;

        let repo_root = self.repo_root.clone();
        let config = match validate(self.into_flags()) {
            Ok(Validated::Help) => {
                print_usage();
                return Ok(0);
            }
            Ok(Validated::Run(config)) => config,
            Err(e) => return Ok(report_validation_error(&e)),
        };

        let root = resolve_repo_root(repo_root.as_deref())?;
        debug!("Repository root: {}", root.display());
        Ok(run_pipeline(&config, &root).await)
    }
}

/// Render the usage text
pub fn usage() -> String {
    Cli::command().render_help().to_string()
}

pub fn print_usage() {
    println!("{}", usage());
}

/// Print a validation failure, returning the exit code
fn report_validation_error(error: &BuildError) -> i32 {
    eprintln!("{}", error);
    if error.is_usage() {
        print_usage();
    }
    error.exit_code()
}

fn resolve_repo_root(root: Option<&Path>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let canonical = std::fs::canonicalize(&root).map_err(|e| BuildError::io(&root, e))?;
    Ok(canonical)
}

async fn run_pipeline(config: &Configuration, root: &Path) -> i32 {
    let layout = RepoLayout::new(root, config.configuration());
    let tools = ToolLocations::from_env(&layout, config.use_global_nuget_cache());

    let downloader = match ReqwestDownloader::new() {
        Ok(downloader) => downloader,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    let pipeline = Pipeline::new(
        CliToolRunner::new(),
        SystemProcesses::new(),
        VsWhereLocator::new(CliToolRunner::new(), tools.clone()),
        downloader,
        tools,
    );

    let result = run_guarded(pipeline.run(config, &layout)).await;

    if let Some(e) = &result.error {
        error!("{}", e);
        eprintln!("Error: {}", e);
    }
    result.exit_code
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Record a backtrace for every panic so a fault report can carry it.
///
/// The slot is per thread; `run_guarded` reads it back on the thread that
/// caught the unwind.
pub fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        std::panic::set_hook(Box::new(|_| {
            let backtrace = Backtrace::force_capture().to_string();
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
        }));
    });
}

/// Drive the pipeline, turning an escaped panic into an `Unhandled fault`
/// failure instead of unwinding out of the process.
pub async fn run_guarded<F>(work: F) -> PipelineResult
where
    F: Future<Output = PipelineResult>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let backtrace = PANIC_BACKTRACE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| "<backtrace unavailable>".to_string());
            let fault: BuildError = InternalError::Fault {
                message: panic_message(panic.as_ref()),
                backtrace,
            }
            .into();
            PipelineResult::failure(fault)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Treat a clap parse failure as a usage error
pub fn report_parse_error(error: &clap::Error) -> i32 {
    let usage: BuildError = ConfigError::Usage {
        message: error.to_string().trim_end().to_string(),
    }
    .into();
    report_validation_error(&usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let flags = Cli::parse_from(["buildctl"]).into_flags();
        assert_eq!(flags.configuration, BuildConfiguration::Debug);
        assert_eq!(flags.verbosity, Verbosity::Minimal);
        assert_eq!(flags.msbuild_engine, BuildEngine::Vs);
        assert_eq!(flags.bootstrap_configuration, BuildConfiguration::Release);
        assert!(flags.use_global_nuget_cache);
        assert!(!flags.help);
        assert!(flags.properties.is_empty());
    }

    #[test]
    fn test_short_flags() {
        let flags =
            Cli::parse_from(["buildctl", "-c", "release", "-v", "diag", "-r", "-b", "-d", "-h"])
                .into_flags();
        assert_eq!(flags.configuration, BuildConfiguration::Release);
        assert_eq!(flags.verbosity, Verbosity::Diagnostic);
        assert!(flags.restore);
        assert!(flags.build);
        assert!(flags.deploy_extensions);
        assert!(flags.help);
    }

    #[test]
    fn test_camel_case_aliases() {
        let flags = Cli::parse_from([
            "buildctl",
            "--msbuildEngine",
            "dotnet",
            "--binaryLog",
            "--testCoreClr",
            "--officialBuildId",
            "20190101.1",
            "--vsBranch",
            "main",
            "--useGlobalNuGetCache",
            "false",
        ])
        .into_flags();
        assert_eq!(flags.msbuild_engine, BuildEngine::Dotnet);
        assert!(flags.binary_log);
        assert!(flags.test_core_clr);
        assert_eq!(flags.official_build_id.as_deref(), Some("20190101.1"));
        assert_eq!(flags.vs_branch.as_deref(), Some("main"));
        assert!(!flags.use_global_nuget_cache);
    }

    #[test]
    fn test_short_aliases() {
        let flags = Cli::parse_from(["buildctl", "--bl", "--test"]).into_flags();
        assert!(flags.binary_log);
        assert!(flags.test_desktop);
    }

    #[test]
    fn test_trailing_properties() {
        let flags = Cli::parse_from(["buildctl", "--build", "/p:Foo=1", "/property:Bar=2"])
            .into_flags();
        assert_eq!(flags.properties, vec!["/p:Foo=1", "/property:Bar=2"]);
    }

    #[test]
    fn test_invalid_values_are_parse_errors() {
        assert!(Cli::try_parse_from(["buildctl", "-c", "Checked"]).is_err());
        assert!(Cli::try_parse_from(["buildctl", "--verbosity", "loud"]).is_err());
        assert!(Cli::try_parse_from(["buildctl", "--msbuild-engine", "make"]).is_err());
        assert!(Cli::try_parse_from(["buildctl", "--unknown"]).is_err());
    }

    #[test]
    fn test_usage_lists_flags() {
        let text = usage();
        assert!(text.contains("--configuration"));
        assert!(text.contains("--test32"));
        assert!(text.contains("PROPERTIES"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_run_guarded_turns_panic_into_fault_with_backtrace() {
        install_panic_hook();
        let result = run_guarded(async {
            if std::hint::black_box(true) {
                panic!("deploy step exploded");
            }
            PipelineResult::success()
        })
        .await;

        assert_eq!(result.exit_code, 1);
        match result.error {
            Some(BuildError::Internal(InternalError::Fault { message, backtrace })) => {
                assert_eq!(message, "deploy step exploded");
                assert!(!backtrace.is_empty());
                assert_ne!(backtrace, "<backtrace unavailable>");
            }
            other => panic!("expected a fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_guarded_passes_through_normal_results() {
        let result = run_guarded(async { PipelineResult::success() }).await;
        assert!(result.is_success());
    }
}
