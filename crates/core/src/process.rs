//! External tool invocation
//!
//! Every external executable goes through a [`ToolRunner`]. The CLI
//! implementation drives `tokio::process` and awaits each child before
//! returning, so invocations never overlap. [`exec_tool`] adds the uniform
//! policy: run inside a `tool.exec` span and turn a nonzero exit into
//! [`ToolError::Failed`].

use crate::errors::{Result, ToolError};
use crate::observability::{fields, tool_span};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, Instrument};

/// Output of a captured invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
}

/// Capability to run external executables
#[allow(async_fn_in_trait)]
pub trait ToolRunner {
    /// Run to completion with inherited stdio, returning the exit code
    async fn run(&self, program: &Path, args: &[String]) -> Result<i32>;

    /// Run to completion capturing stdout
    async fn run_captured(&self, program: &Path, args: &[String]) -> Result<CapturedOutput>;

    /// Start without waiting for exit
    fn spawn_detached(&self, program: &Path, args: &[String]) -> Result<()>;
}

impl<T: ToolRunner> ToolRunner for &T {
    async fn run(&self, program: &Path, args: &[String]) -> Result<i32> {
        (*self).run(program, args).await
    }

    async fn run_captured(&self, program: &Path, args: &[String]) -> Result<CapturedOutput> {
        (*self).run_captured(program, args).await
    }

    fn spawn_detached(&self, program: &Path, args: &[String]) -> Result<()> {
        (*self).spawn_detached(program, args)
    }
}

/// Short display name of a program for logs and errors
pub fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Render a command line for logging
pub fn display_command(program: &Path, args: &[String]) -> String {
    let mut words = Vec::with_capacity(args.len() + 1);
    words.push(program.display().to_string());
    words.extend(args.iter().cloned());
    shell_words::join(words)
}

/// Tool runner backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct CliToolRunner;

impl CliToolRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(program: &Path, args: &[String]) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(program);
        command.args(args);
        command
    }

    fn map_spawn_error(program: &Path, error: std::io::Error) -> crate::errors::BuildError {
        if error.kind() == ErrorKind::NotFound {
            ToolError::Missing {
                path: program.to_path_buf(),
            }
            .into()
        } else {
            ToolError::Launch {
                tool: tool_name(program),
                message: error.to_string(),
            }
            .into()
        }
    }

    fn exit_code(program: &Path, status: std::process::ExitStatus) -> Result<i32> {
        status.code().ok_or_else(|| {
            ToolError::Launch {
                tool: tool_name(program),
                message: "terminated by signal".to_string(),
            }
            .into()
        })
    }
}

impl ToolRunner for CliToolRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<i32> {
        debug!("Running: {}", display_command(program, args));
        let status = Self::command(program, args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| Self::map_spawn_error(program, e))?;
        Self::exit_code(program, status)
    }

    async fn run_captured(&self, program: &Path, args: &[String]) -> Result<CapturedOutput> {
        debug!("Running (captured): {}", display_command(program, args));
        let output = Self::command(program, args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| Self::map_spawn_error(program, e))?;
        Ok(CapturedOutput {
            exit_code: Self::exit_code(program, output.status)?,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    fn spawn_detached(&self, program: &Path, args: &[String]) -> Result<()> {
        info!("Starting: {}", display_command(program, args));
        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
            .spawn()
            .map(|_child| ())
            .map_err(|e| Self::map_spawn_error(program, e))
    }
}

/// Run a tool and fail on nonzero exit
pub async fn exec_tool<R: ToolRunner>(runner: &R, program: &Path, args: &[String]) -> Result<()> {
    let name = tool_name(program);
    let span = tool_span(&name);
    let code = runner
        .run(program, args)
        .instrument(span.clone())
        .await?;
    span.record(fields::EXIT_CODE, code);

    if code != 0 {
        return Err(ToolError::Failed { tool: name, code }.into());
    }
    Ok(())
}

/// Run a tool capturing stdout and fail on nonzero exit
pub async fn exec_tool_captured<R: ToolRunner>(
    runner: &R,
    program: &Path,
    args: &[String],
) -> Result<String> {
    let name = tool_name(program);
    let span = tool_span(&name);
    let output = runner
        .run_captured(program, args)
        .instrument(span.clone())
        .await?;
    span.record(fields::EXIT_CODE, output.exit_code);

    if output.exit_code != 0 {
        return Err(ToolError::Failed {
            tool: name,
            code: output.exit_code,
        }
        .into());
    }
    Ok(output.stdout)
}

/// Typed argument list for one tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolArgs(Vec<String>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.0.push(arg.into());
        self
    }

    pub fn arg_if(self, condition: bool, arg: impl Into<String>) -> Self {
        if condition {
            self.arg(arg)
        } else {
            self
        }
    }

    /// A flag followed by its value as a separate argument
    pub fn pair(self, flag: &str, value: impl Into<String>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn path(self, path: impl AsRef<Path>) -> Self {
        self.arg(path.as_ref().display().to_string())
    }

    /// `/p:Name=value`
    pub fn property(self, name: &str, value: impl std::fmt::Display) -> Self {
        self.arg(format!("/p:{}={}", name, value))
    }

    pub fn extend<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<ToolArgs> for Vec<String> {
    fn from(args: ToolArgs) -> Self {
        args.0
    }
}

/// Program plus leading arguments, for tools hosted by a launcher
/// (e.g. `dotnet msbuild`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run to completion, failing on nonzero exit
    pub async fn exec<R: ToolRunner>(&self, runner: &R) -> Result<()> {
        exec_tool(runner, &self.program, &self.args).await
    }
}

pub mod mock {
    //! Recording tool runner for tests
    //!
    //! Calls are recorded in order. Exit codes, captured output and side
    //! effects are configured per tool file name (e.g. `drop.exe`).

    use super::{tool_name, CapturedOutput, ToolRunner};
    use crate::errors::{Result, ToolError};
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    /// Side effect run in place of a tool; returns the exit code
    pub type ToolHook = Arc<dyn Fn(&[String]) -> i32 + Send + Sync>;

    /// One recorded invocation
    #[derive(Debug, Clone)]
    pub struct MockToolCall {
        pub program: PathBuf,
        pub args: Vec<String>,
        pub detached: bool,
        /// Values of watched environment variables at call time
        pub env: HashMap<String, Option<String>>,
    }

    impl MockToolCall {
        pub fn tool(&self) -> String {
            tool_name(&self.program)
        }
    }

    #[derive(Default)]
    struct MockState {
        exit_codes: HashMap<String, i32>,
        outputs: HashMap<String, String>,
        hooks: HashMap<String, ToolHook>,
        missing: HashSet<String>,
        watched_env: Vec<String>,
    }

    /// Tool runner that records calls instead of spawning processes
    #[derive(Clone, Default)]
    pub struct MockToolRunner {
        state: Arc<Mutex<MockState>>,
        history: Arc<Mutex<Vec<MockToolCall>>>,
    }

    impl std::fmt::Debug for MockToolRunner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockToolRunner")
                .field("calls", &self.history.lock().unwrap().len())
                .finish()
        }
    }

    impl MockToolRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Exit code returned for a tool (default 0)
        pub fn set_exit_code(&self, tool: &str, code: i32) {
            self.state
                .lock()
                .unwrap()
                .exit_codes
                .insert(tool.to_string(), code);
        }

        /// Captured stdout returned for a tool
        pub fn set_output(&self, tool: &str, stdout: impl Into<String>) {
            self.state
                .lock()
                .unwrap()
                .outputs
                .insert(tool.to_string(), stdout.into());
        }

        /// Replace a tool with a closure; its return value is the exit code
        pub fn set_hook<F>(&self, tool: &str, hook: F)
        where
            F: Fn(&[String]) -> i32 + Send + Sync + 'static,
        {
            self.state
                .lock()
                .unwrap()
                .hooks
                .insert(tool.to_string(), Arc::new(hook));
        }

        /// Make a tool fail to start as if absent
        pub fn set_missing(&self, tool: &str) {
            self.state.lock().unwrap().missing.insert(tool.to_string());
        }

        /// Record this variable's value on every call
        pub fn watch_env(&self, name: &str) {
            self.state.lock().unwrap().watched_env.push(name.to_string());
        }

        pub fn calls(&self) -> Vec<MockToolCall> {
            self.history.lock().unwrap().clone()
        }

        pub fn calls_to(&self, tool: &str) -> Vec<MockToolCall> {
            self.calls()
                .into_iter()
                .filter(|call| call.tool() == tool)
                .collect()
        }

        /// Tool names in call order
        pub fn tool_sequence(&self) -> Vec<String> {
            self.calls().iter().map(MockToolCall::tool).collect()
        }

        fn invoke(&self, program: &Path, args: &[String], detached: bool) -> Result<i32> {
            let name = tool_name(program);
            let (hook, code, watched) = {
                let state = self.state.lock().unwrap();
                if state.missing.contains(&name) {
                    return Err(ToolError::Missing {
                        path: program.to_path_buf(),
                    }
                    .into());
                }
                (
                    state.hooks.get(&name).cloned(),
                    state.exit_codes.get(&name).copied().unwrap_or(0),
                    state.watched_env.clone(),
                )
            };

            let env = watched
                .into_iter()
                .map(|key| {
                    let value = std::env::var(&key).ok();
                    (key, value)
                })
                .collect();
            self.history.lock().unwrap().push(MockToolCall {
                program: program.to_path_buf(),
                args: args.to_vec(),
                detached,
                env,
            });

            Ok(match hook {
                Some(hook) => hook(args),
                None => code,
            })
        }
    }

    impl ToolRunner for MockToolRunner {
        async fn run(&self, program: &Path, args: &[String]) -> Result<i32> {
            self.invoke(program, args, false)
        }

        async fn run_captured(&self, program: &Path, args: &[String]) -> Result<CapturedOutput> {
            let exit_code = self.invoke(program, args, false)?;
            let stdout = self
                .state
                .lock()
                .unwrap()
                .outputs
                .get(&tool_name(program))
                .cloned()
                .unwrap_or_default();
            Ok(CapturedOutput { exit_code, stdout })
        }

        fn spawn_detached(&self, program: &Path, args: &[String]) -> Result<()> {
            self.invoke(program, args, true).map(|_| ())
        }
    }
}
