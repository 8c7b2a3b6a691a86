//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use buildctl_core::config::{BuildConfiguration, RawFlags};
use buildctl_core::controller::{Pipeline, STAGED_TEMPLATE_FILES};
use buildctl_core::deploy::mock::MockIdeLocator;
use buildctl_core::http::mock::MockDownloader;
use buildctl_core::hygiene::mock::MockProcesses;
use buildctl_core::process::mock::MockToolRunner;
use buildctl_core::tools::ToolLocations;
use buildctl_core::{validate, Configuration, RepoLayout, Validated};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub type MockPipeline = Pipeline<MockToolRunner, MockProcesses, MockIdeLocator, MockDownloader>;

/// A scratch repository with the fakes a pipeline run needs
pub struct Fixture {
    pub repo: TempDir,
    pub scratch: TempDir,
    pub runner: MockToolRunner,
    pub processes: MockProcesses,
    pub locator: MockIdeLocator,
    pub downloader: MockDownloader,
    pub tools: ToolLocations,
}

impl Fixture {
    pub fn new() -> Self {
        let repo = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let mut tools = ToolLocations::with_packages_dir(repo.path().join("packages"));
        let procdump = scratch.path().join("procdump");
        touch(&procdump.join("procdump.exe"));
        tools.procdump_dir = procdump;
        tools.local_data_dir = Some(scratch.path().join("LocalAppData"));

        Self {
            repo,
            locator: MockIdeLocator::at(scratch.path().join("vs")),
            scratch,
            runner: MockToolRunner::new(),
            processes: MockProcesses::new(),
            downloader: MockDownloader::new(),
            tools,
        }
    }

    pub fn root(&self) -> &Path {
        self.repo.path()
    }

    pub fn layout(&self, configuration: BuildConfiguration) -> RepoLayout {
        RepoLayout::new(self.root(), configuration)
    }

    /// An empty file standing in for an external tool
    pub fn fake_tool(&self, name: &str) -> PathBuf {
        let path = self.scratch.path().join("tools").join(name);
        touch(&path);
        path
    }

    pub fn stage_template_resources(&self, layout: &RepoLayout) {
        for name in STAGED_TEMPLATE_FILES {
            touch(&layout.test_resources_dir().join(name));
        }
    }

    pub fn install_test_runner(&self, layout: &RepoLayout) {
        touch(&layout.test_runner());
    }

    pub fn pipeline(&self) -> MockPipeline {
        Pipeline::new(
            self.runner.clone(),
            self.processes.clone(),
            self.locator.clone(),
            self.downloader.clone(),
            self.tools.clone(),
        )
    }
}

pub fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}

pub fn configuration(flags: RawFlags) -> Configuration {
    match validate(flags).unwrap() {
        Validated::Run(config) => config,
        Validated::Help => panic!("unexpected help"),
    }
}

/// Value following `flag` in an argument list
pub fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
