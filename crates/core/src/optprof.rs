//! Optimization data
//!
//! Before a build, the most recent optimization-data drop is located through
//! the artifact-service client and downloaded into the repository's `.o`
//! directory. After a build, the profiling tool produces new data from the
//! insertion output, and the generated setup manifests are published to the
//! CI system as a single comma-joined variable.
//!
//! Drop selection is a pure fold ([`select_latest_drop`]) whose treatment of
//! the very first candidate is a named [`FirstCandidatePolicy`].

use crate::config::OfficialBuild;
use crate::errors::{BuildError, OptimizationError, Result, ToolError};
use crate::layout::RepoLayout;
use crate::process::{exec_tool, ToolArgs, ToolRunner};
use crate::tools::ToolLocations;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Artifact service holding optimization-data drops
pub const DROP_SERVICE_URL: &str = "https://devdiv.artifacts.visualstudio.com";
/// Name prefix shared by every optimization-data drop
pub const DROP_PREFIX: &str = "OptimizationData/dotnet/roslyn/master-vs-deps";
/// CI variable receiving the generated manifest list
pub const MANIFEST_LIST_VARIABLE: &str = "VisualStudio.SetupManifestList";

const DROP_LISTING_FILE: &str = "OptProfDrops.json";
const MANIFEST_EXTENSION: &str = "vsman";

/// One drop as reported by the artifact service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptimizationDrop {
    pub name: String,
    #[serde(rename = "CreatedDateUtc")]
    pub created_utc: DateTime<Utc>,
    pub upload_complete: bool,
    pub delete_pending: bool,
}

impl OptimizationDrop {
    /// Fully uploaded and not scheduled for deletion
    pub fn is_usable(&self) -> bool {
        self.upload_complete && !self.delete_pending
    }
}

/// How the first drop examined becomes the initial selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstCandidatePolicy {
    /// The first drop is accepted whatever its state; later drops replace it
    /// only when usable and strictly newer
    #[default]
    AcceptAny,
    /// Only usable drops are ever selected
    RequireUsable,
}

/// Pick the latest drop from the service's listing order
pub fn select_latest_drop(
    drops: &[OptimizationDrop],
    policy: FirstCandidatePolicy,
) -> Option<&OptimizationDrop> {
    drops.iter().fold(None, |selected, candidate| match selected {
        None => match policy {
            FirstCandidatePolicy::AcceptAny => Some(candidate),
            FirstCandidatePolicy::RequireUsable => candidate.is_usable().then_some(candidate),
        },
        Some(current) => {
            if candidate.is_usable() && candidate.created_utc > current.created_utc {
                Some(candidate)
            } else {
                Some(current)
            }
        }
    })
}

/// Parse the drop tool's JSON listing
pub fn parse_drop_listing(json: &str) -> Result<Vec<OptimizationDrop>> {
    serde_json::from_str(json).map_err(|e| OptimizationError::Listing(e).into())
}

/// Result of the pre-build acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Drop downloaded into the optimization data directory
    Acquired { drop: String },
    /// Client tool absent on a non-official build; optimization data is off
    Unavailable,
}

fn service_args(official: &OfficialBuild) -> ToolArgs {
    let args = ToolArgs::new().pair("--dropservice", DROP_SERVICE_URL);
    match &official.vs_drop_access_token {
        Some(token) => args.pair("--patAuth", token.as_str()),
        None => args,
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| BuildError::io(path, e))
}

/// Download the latest optimization-data drop
pub async fn acquire<R: ToolRunner>(
    runner: &R,
    tools: &ToolLocations,
    layout: &RepoLayout,
    official: &OfficialBuild,
    policy: FirstCandidatePolicy,
) -> Result<AcquireOutcome> {
    let drop_tool = match tools.drop_tool() {
        Ok(path) => path,
        Err(BuildError::Tool(ToolError::Missing { path })) if !official.is_official() => {
            warn!(
                "Drop tool not found at {}; skipping optimization data",
                path.display()
            );
            return Ok(AcquireOutcome::Unavailable);
        }
        Err(e) => return Err(e),
    };

    let temp_dir = layout.temp_dir();
    let log_dir = layout.log_dir();
    create_dir(&temp_dir)?;
    create_dir(&log_dir)?;
    let listing = temp_dir.join(DROP_LISTING_FILE);
    let trace = log_dir.join("OptimizationDataAcquisition.log");

    let list_args = ToolArgs::new()
        .arg("list")
        .extend(service_args(official).into_vec())
        .pair("--pathPrefix", DROP_PREFIX)
        .pair("--toJsonFile", listing.display().to_string())
        .pair("--traceto", trace.display().to_string());
    exec_tool(runner, &drop_tool, list_args.as_slice()).await?;

    let json = fs::read_to_string(&listing).map_err(|e| BuildError::io(&listing, e))?;
    let drops = parse_drop_listing(&json)?;

    let latest = select_latest_drop(&drops, policy).ok_or_else(|| {
        OptimizationError::NoMatchingDrop {
            service: DROP_SERVICE_URL.to_string(),
            prefix: DROP_PREFIX.to_string(),
        }
    })?;
    if !latest.is_usable() {
        warn!(
            "Selected drop '{}' is not usable (upload complete: {}, delete pending: {})",
            latest.name, latest.upload_complete, latest.delete_pending
        );
    }
    info!("Latest optimization data drop: {}", latest.name);

    let get_args = ToolArgs::new()
        .arg("get")
        .extend(service_args(official).into_vec())
        .pair("--name", latest.name.as_str())
        .pair("--dest", layout.optimization_data_dir().display().to_string())
        .pair("--traceto", trace.display().to_string());
    exec_tool(runner, &drop_tool, get_args.as_slice()).await?;

    Ok(AcquireOutcome::Acquired {
        drop: latest.name.clone(),
    })
}

/// CI logging command setting the manifest list variable
pub fn manifest_list_line(manifests: &str) -> String {
    format!(
        "##vso[task.setvariable variable={};]{}",
        MANIFEST_LIST_VARIABLE, manifests
    )
}

/// Comma-joined names of the `*.vsman` files directly inside `dir`
pub fn collect_manifests(dir: &Path) -> Result<String> {
    let entries = fs::read_dir(dir).map_err(|e| BuildError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| BuildError::io(dir, e))?.path();
        let is_manifest = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION));
        if is_manifest && path.is_file() {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names.join(","))
}

/// Produce optimization data from the build's insertion output
///
/// Returns the comma-joined manifest list, which is also printed as a CI
/// variable line on stdout.
pub async fn generate<R: ToolRunner>(
    runner: &R,
    tools: &ToolLocations,
    layout: &RepoLayout,
    official: &OfficialBuild,
) -> Result<String> {
    let optprof_tool = tools.optprof_tool()?;
    let insertion_dir = layout.insertion_dir();
    let output_dir = layout.optprof_dir();

    let args = ToolArgs::new()
        .pair("--configFile", layout.optprof_config().display().to_string())
        .pair("--insertionFolder", insertion_dir.display().to_string())
        .pair("--outputFolder", output_dir.join("Data").display().to_string());
    exec_tool(runner, &optprof_tool, args.as_slice()).await?;

    let branch_dir = output_dir.join("BranchInfo");
    create_dir(&branch_dir)?;
    let branch_file = branch_dir.join("vsbranch.txt");
    fs::write(&branch_file, &official.vs_branch).map_err(|e| BuildError::io(&branch_file, e))?;

    let manifests = collect_manifests(&insertion_dir)?;
    println!("{}", manifest_list_line(&manifests));
    Ok(manifests)
}
