//! Configuration validation
//!
//! Raw command-line intent is collected into [`RawFlags`] and turned into a
//! single immutable [`Configuration`] by [`validate`]. Every cross-flag rule is
//! evaluated here, before any side effect, in a fixed order where the first
//! failing rule wins:
//!
//! 1. help flag or a `/help` / `/?` pass-through ends the run successfully
//! 2. official builds require a branch, a drop name and an access token
//! 3. non-official builds get placeholder branch and drop names
//! 4. `test32` and `test64` are mutually exclusive
//! 5. unit tests and integration (VSI) tests are mutually exclusive
//! 6. integration tests force analyzers and bootstrap off
//! 7. `build` + `launch` requires `deploy-extensions`
//! 8. `test32` defaults on unless `test64` is set
//! 9. every pass-through must be a property assignment
//!
//! Derived values (such as whether optimization data applies) are computed
//! once here and stored as plain fields.

use crate::errors::{ConfigError, Result};
use crate::phase::{Phase, PhaseSet};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Branch name used when no official build is requested
pub const PLACEHOLDER_VS_BRANCH: &str = "dummy/ci";
/// Drop name used when no official build is requested
pub const PLACEHOLDER_VS_DROP_NAME: &str = "Products/DummyDrop";

/// Pass-through tokens that request help
const HELP_TOKENS: [&str; 2] = ["/help", "/?"];

static PROPERTY_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^/p(?:roperty)?:")
        .expect("property assignment pattern is valid")
});

/// Build configuration name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildConfiguration {
    #[default]
    Debug,
    Release,
}

impl BuildConfiguration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
        }
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildConfiguration {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            _ => Err(ConfigError::Usage {
                message: format!("Invalid configuration '{}': expected Debug or Release", s),
            }),
        }
    }
}

/// Build engine log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Minimal,
    Normal,
    Detailed,
    Diagnostic,
}

impl Verbosity {
    /// Value for the build engine's `/v:` switch
    pub fn switch_value(&self) -> &'static str {
        match self {
            Self::Quiet => "q",
            Self::Minimal => "m",
            Self::Normal => "n",
            Self::Detailed => "d",
            Self::Diagnostic => "diag",
        }
    }
}

impl FromStr for Verbosity {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "q" | "quiet" => Ok(Self::Quiet),
            "m" | "minimal" => Ok(Self::Minimal),
            "n" | "normal" => Ok(Self::Normal),
            "d" | "detailed" => Ok(Self::Detailed),
            "diag" | "diagnostic" => Ok(Self::Diagnostic),
            _ => Err(ConfigError::Usage {
                message: format!(
                    "Invalid verbosity '{}': expected q[uiet], m[inimal], n[ormal], d[etailed] or diag[nostic]",
                    s
                ),
            }),
        }
    }
}

/// Which build engine drives the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildEngine {
    /// The engine shipped with the host IDE
    #[default]
    Vs,
    /// The engine hosted by the dotnet CLI
    Dotnet,
}

impl BuildEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vs => "vs",
            Self::Dotnet => "dotnet",
        }
    }
}

impl fmt::Display for BuildEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildEngine {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vs" => Ok(Self::Vs),
            "dotnet" => Ok(Self::Dotnet),
            _ => Err(ConfigError::Usage {
                message: format!("Invalid build engine '{}': expected vs or dotnet", s),
            }),
        }
    }
}

/// Flags exactly as given on the command line, before validation
#[derive(Debug, Clone)]
pub struct RawFlags {
    pub configuration: BuildConfiguration,
    pub verbosity: Verbosity,
    pub msbuild_engine: BuildEngine,

    pub restore: bool,
    pub build: bool,
    pub rebuild: bool,
    pub sign: bool,
    pub pack: bool,
    pub publish: bool,
    pub launch: bool,
    pub help: bool,

    pub bootstrap: bool,
    pub bootstrap_configuration: BuildConfiguration,
    pub binary_log: bool,
    pub ci: bool,
    pub procdump: bool,
    pub skip_analyzers: bool,
    pub deploy_extensions: bool,
    pub prepare_machine: bool,
    pub use_global_nuget_cache: bool,
    pub warn_as_error: bool,

    pub official_build_id: Option<String>,
    pub vs_drop_name: Option<String>,
    pub vs_branch: Option<String>,
    pub vs_drop_access_token: Option<String>,

    pub test32: bool,
    pub test64: bool,
    pub test_vsi: bool,
    pub test_desktop: bool,
    pub test_core_clr: bool,
    pub test_ioperation: bool,

    pub properties: Vec<String>,
}

impl Default for RawFlags {
    fn default() -> Self {
        Self {
            configuration: BuildConfiguration::Debug,
            verbosity: Verbosity::Minimal,
            msbuild_engine: BuildEngine::Vs,
            restore: false,
            build: false,
            rebuild: false,
            sign: false,
            pack: false,
            publish: false,
            launch: false,
            help: false,
            bootstrap: false,
            bootstrap_configuration: BuildConfiguration::Release,
            binary_log: false,
            ci: false,
            procdump: false,
            skip_analyzers: false,
            deploy_extensions: false,
            prepare_machine: false,
            use_global_nuget_cache: true,
            warn_as_error: false,
            official_build_id: None,
            vs_drop_name: None,
            vs_branch: None,
            vs_drop_access_token: None,
            test32: false,
            test64: false,
            test_vsi: false,
            test_desktop: false,
            test_core_clr: false,
            test_ioperation: false,
            properties: Vec::new(),
        }
    }
}

/// Requested test kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestFlags {
    pub test32: bool,
    pub test64: bool,
    pub vsi: bool,
    pub desktop: bool,
    pub core_clr: bool,
    pub ioperation: bool,
}

impl TestFlags {
    /// Whether any of the runner-driven test kinds was requested
    pub fn uses_test_runner(&self) -> bool {
        self.desktop || self.vsi || self.ioperation
    }

    pub fn any(&self) -> bool {
        self.uses_test_runner() || self.core_clr
    }
}

/// Official build identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfficialBuild {
    pub build_id: Option<String>,
    pub vs_branch: String,
    pub vs_drop_name: String,
    pub vs_drop_access_token: Option<String>,
}

impl OfficialBuild {
    pub fn is_official(&self) -> bool {
        self.build_id.is_some()
    }
}

/// Validated, immutable pipeline configuration
///
/// Produced only by [`validate`] and then passed by shared reference. Fields
/// are read through accessors, so derived values stay as validation computed
/// them.
///
/// ```
/// use buildctl_core::config::{validate, RawFlags, Validated};
///
/// let Validated::Run(config) = validate(RawFlags::default()).unwrap() else {
///     unreachable!()
/// };
/// assert!(!config.apply_optimization_data());
/// assert!(config.tests().test32);
/// ```
///
/// A configuration cannot be altered after validation:
///
/// ```compile_fail
/// use buildctl_core::config::{validate, RawFlags, Validated};
///
/// let Validated::Run(mut config) = validate(RawFlags::default()).unwrap() else {
///     unreachable!()
/// };
/// config.apply_optimization_data = true;
/// ```
///
/// Nor built outside of [`validate`]:
///
/// ```compile_fail
/// use buildctl_core::config::Configuration;
///
/// let config = Configuration {
///     ci: true,
///     ..unimplemented!()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Configuration {
    configuration: BuildConfiguration,
    verbosity: Verbosity,
    engine: BuildEngine,
    phases: PhaseSet,
    tests: TestFlags,

    bootstrap: bool,
    bootstrap_configuration: BuildConfiguration,
    binary_log: bool,
    ci: bool,
    procdump: bool,
    run_analyzers: bool,
    deploy_extensions: bool,
    prepare_machine: bool,
    use_global_nuget_cache: bool,
    warn_as_error: bool,

    official: OfficialBuild,
    properties: Vec<String>,

    apply_optimization_data: bool,
    runs_build_engine: bool,
}

impl Configuration {
    pub fn requests(&self, phase: Phase) -> bool {
        self.phases.contains(phase)
    }

    pub fn configuration(&self) -> BuildConfiguration {
        self.configuration
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn engine(&self) -> BuildEngine {
        self.engine
    }

    pub fn phases(&self) -> &PhaseSet {
        &self.phases
    }

    pub fn tests(&self) -> TestFlags {
        self.tests
    }

    /// Bootstrap build requested and not forced off by integration testing
    pub fn bootstrap(&self) -> bool {
        self.bootstrap
    }

    pub fn bootstrap_configuration(&self) -> BuildConfiguration {
        self.bootstrap_configuration
    }

    pub fn binary_log(&self) -> bool {
        self.binary_log
    }

    pub fn ci(&self) -> bool {
        self.ci
    }

    pub fn procdump(&self) -> bool {
        self.procdump
    }

    pub fn run_analyzers(&self) -> bool {
        self.run_analyzers
    }

    pub fn deploy_extensions(&self) -> bool {
        self.deploy_extensions
    }

    pub fn prepare_machine(&self) -> bool {
        self.prepare_machine
    }

    pub fn use_global_nuget_cache(&self) -> bool {
        self.use_global_nuget_cache
    }

    pub fn warn_as_error(&self) -> bool {
        self.warn_as_error
    }

    /// Official build identity, with placeholders filled for other builds
    pub fn official(&self) -> &OfficialBuild {
        &self.official
    }

    /// Pass-through property assignments, in command-line order
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// CI + Release + IDE-native engine
    pub fn apply_optimization_data(&self) -> bool {
        self.apply_optimization_data
    }

    /// Any of restore, build, rebuild, pack, sign, publish or CoreClr tests
    pub fn runs_build_engine(&self) -> bool {
        self.runs_build_engine
    }
}

/// Result of validating raw flags
#[derive(Debug, Clone)]
pub enum Validated {
    /// Help was requested; print usage and exit successfully
    Help,
    /// Run the pipeline with this configuration
    Run(Configuration),
}

fn usage(message: impl Into<String>) -> ConfigError {
    ConfigError::Usage {
        message: message.into(),
    }
}

fn precondition(message: impl Into<String>) -> ConfigError {
    ConfigError::Precondition {
        message: message.into(),
    }
}

fn is_help_token(property: &str) -> bool {
    HELP_TOKENS
        .iter()
        .any(|token| property.eq_ignore_ascii_case(token))
}

/// Whether a pass-through argument is a recognized property assignment
pub fn is_property_assignment(property: &str) -> bool {
    PROPERTY_ASSIGNMENT.is_match(property)
}

/// Validate raw flags into a configuration
pub fn validate(flags: RawFlags) -> Result<Validated> {
    if flags.help || flags.properties.iter().any(|p| is_help_token(p)) {
        return Ok(Validated::Help);
    }

    let official = resolve_official_build(&flags)?;

    if flags.test32 && flags.test64 {
        return Err(usage("Cannot combine --test32 and --test64").into());
    }

    let any_unit = flags.test_desktop || flags.test_core_clr;
    if any_unit && flags.test_vsi {
        return Err(usage("Cannot combine unit and VSI testing").into());
    }

    let (skip_analyzers, bootstrap) = if flags.test_vsi {
        debug!("Integration testing requested: disabling analyzers and bootstrap");
        (true, false)
    } else {
        (flags.skip_analyzers, flags.bootstrap)
    };

    if flags.build && flags.launch && !flags.deploy_extensions {
        return Err(usage("Cannot combine --build and --launch without --deploy-extensions").into());
    }

    let tests = TestFlags {
        test32: !flags.test64,
        test64: flags.test64,
        vsi: flags.test_vsi,
        desktop: flags.test_desktop,
        core_clr: flags.test_core_clr,
        ioperation: flags.test_ioperation,
    };

    if let Some(invalid) = flags
        .properties
        .iter()
        .find(|p| !is_property_assignment(p))
    {
        return Err(usage(format!("Invalid argument: {}", invalid)).into());
    }

    let phases = PhaseSet::new()
        .with(Phase::Restore, flags.restore)
        .with(Phase::Build, flags.build)
        .with(Phase::Rebuild, flags.rebuild)
        .with(Phase::Sign, flags.sign)
        .with(Phase::Pack, flags.pack)
        .with(Phase::Publish, flags.publish)
        .with(Phase::Test, tests.any())
        .with(Phase::Launch, flags.launch);

    let apply_optimization_data = flags.ci
        && flags.configuration == BuildConfiguration::Release
        && flags.msbuild_engine == BuildEngine::Vs;

    let runs_build_engine = flags.restore
        || flags.build
        || flags.rebuild
        || flags.pack
        || flags.sign
        || flags.publish
        || flags.test_core_clr;

    Ok(Validated::Run(Configuration {
        configuration: flags.configuration,
        verbosity: flags.verbosity,
        engine: flags.msbuild_engine,
        phases,
        tests,
        bootstrap,
        bootstrap_configuration: flags.bootstrap_configuration,
        binary_log: flags.binary_log,
        ci: flags.ci,
        procdump: flags.procdump,
        run_analyzers: !skip_analyzers,
        deploy_extensions: flags.deploy_extensions,
        prepare_machine: flags.prepare_machine,
        use_global_nuget_cache: flags.use_global_nuget_cache,
        warn_as_error: flags.warn_as_error,
        official,
        properties: flags.properties,
        apply_optimization_data,
        runs_build_engine,
    }))
}

fn resolve_official_build(flags: &RawFlags) -> Result<OfficialBuild> {
    let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
    let build_id = non_empty(&flags.official_build_id);
    let vs_branch = non_empty(&flags.vs_branch);
    let vs_drop_name = non_empty(&flags.vs_drop_name);
    let token = non_empty(&flags.vs_drop_access_token);

    if build_id.is_some() {
        let (Some(vs_branch), Some(vs_drop_name)) = (vs_branch, vs_drop_name) else {
            return Err(
                precondition("--vs-drop-name and --vs-branch are required for official builds")
                    .into(),
            );
        };
        if token.is_none() {
            return Err(
                precondition("--vs-drop-access-token is required for official builds").into(),
            );
        }
        return Ok(OfficialBuild {
            build_id,
            vs_branch,
            vs_drop_name,
            vs_drop_access_token: token,
        });
    }

    Ok(OfficialBuild {
        build_id: None,
        vs_branch: vs_branch.unwrap_or_else(|| PLACEHOLDER_VS_BRANCH.to_string()),
        vs_drop_name: vs_drop_name.unwrap_or_else(|| PLACEHOLDER_VS_DROP_NAME.to_string()),
        vs_drop_access_token: token,
    })
}
