//! End-to-end pipeline runs over in-crate fakes
//!
//! Every test that runs the pipeline changes the working directory, so they
//! are serialized.

mod common;

use buildctl_core::config::{BuildConfiguration, BuildEngine, RawFlags};
use buildctl_core::deploy::{DEPLOYMENT_ORDER, VS_INSTALL_DIR_ENV};
use buildctl_core::errors::{BuildError, ToolError};
use buildctl_core::test_run::IOPERATION_ENV;
use common::{arg_value, configuration, touch, Fixture};
use serial_test::serial;
use std::fs;
use std::path::PathBuf;

const DROP_LISTING: &str = r#"[
  {"Name": "OptimizationData/dotnet/roslyn/master-vs-deps/a/1", "CreatedDateUtc": "2019-03-01T10:00:00Z", "UploadComplete": true, "DeletePending": false},
  {"Name": "OptimizationData/dotnet/roslyn/master-vs-deps/b/2", "CreatedDateUtc": "2019-03-02T10:00:00Z", "UploadComplete": true, "DeletePending": false}
]"#;

fn clear_ide_env() {
    std::env::remove_var(VS_INSTALL_DIR_ENV);
}

#[tokio::test]
#[serial]
async fn test_ci_release_runs_phases_in_order() {
    clear_ide_env();
    let mut fixture = Fixture::new();
    fixture.tools.drop_tool = Some(fixture.fake_tool("drop.exe"));
    fixture.tools.optprof_tool = Some(fixture.fake_tool("roslyn.optprof.exe"));

    let layout = fixture.layout(BuildConfiguration::Release);
    fixture.stage_template_resources(&layout);
    touch(&layout.insertion_dir().join("Microsoft.CodeAnalysis.Compilers.vsman"));
    touch(&layout.insertion_dir().join("Microsoft.CodeAnalysis.ExpressionEvaluator.vsman"));

    fixture.runner.set_hook("drop.exe", |args| {
        if args[0] == "list" {
            let listing = arg_value(args, "--toJsonFile").unwrap();
            fs::write(listing, DROP_LISTING).unwrap();
        }
        0
    });

    // Flags given "out of order" still run restore before build.
    let config = configuration(RawFlags {
        build: true,
        restore: true,
        ci: true,
        configuration: BuildConfiguration::Release,
        ..Default::default()
    });
    assert!(config.apply_optimization_data());

    let result = fixture.pipeline().run(&config, &layout).await;
    assert!(result.is_success(), "{:?}", result.error);

    assert_eq!(
        fixture.runner.tool_sequence(),
        vec!["drop.exe", "drop.exe", "MSBuild.exe", "roslyn.optprof.exe"]
    );

    let calls = fixture.runner.calls();
    assert_eq!(calls[0].args[0], "list");
    assert_eq!(calls[1].args[0], "get");
    assert_eq!(
        arg_value(&calls[1].args, "--name"),
        Some("OptimizationData/dotnet/roslyn/master-vs-deps/b/2")
    );
    assert!(calls[1].args.iter().all(|arg| arg != "--patAuth"));

    let build = &calls[2];
    assert_eq!(
        build.program,
        fixture
            .scratch
            .path()
            .join("vs/MSBuild/Current/Bin/MSBuild.exe")
    );
    assert!(build
        .args
        .contains(&"/p:EnablePartialNgenOptimization=true".to_string()));
    assert!(build.args.contains(&"/p:Restore=true".to_string()));
    assert!(build.args.contains(&"/p:Build=true".to_string()));

    let staged = layout.temp_dir().join("NuGet.Config");
    assert!(staged.is_file());
    assert_eq!(
        fs::read_to_string(layout.optprof_dir().join("BranchInfo/vsbranch.txt")).unwrap(),
        "dummy/ci"
    );
}

#[tokio::test]
#[serial]
async fn test_missing_drop_tool_disables_optimization_data() {
    clear_ide_env();
    let fixture = Fixture::new();
    let layout = fixture.layout(BuildConfiguration::Release);
    fixture.stage_template_resources(&layout);

    let config = configuration(RawFlags {
        restore: true,
        build: true,
        ci: true,
        configuration: BuildConfiguration::Release,
        ..Default::default()
    });

    let result = fixture.pipeline().run(&config, &layout).await;
    assert!(result.is_success(), "{:?}", result.error);

    // Neither acquisition nor generation runs once the tool is known absent.
    assert_eq!(fixture.runner.tool_sequence(), vec!["MSBuild.exe"]);
    assert!(fixture.runner.calls()[0]
        .args
        .contains(&"/p:EnablePartialNgenOptimization=false".to_string()));
}

#[tokio::test]
#[serial]
async fn test_missing_drop_tool_fails_official_build() {
    clear_ide_env();
    let fixture = Fixture::new();
    let layout = fixture.layout(BuildConfiguration::Release);
    fixture.stage_template_resources(&layout);

    let config = configuration(RawFlags {
        restore: true,
        ci: true,
        configuration: BuildConfiguration::Release,
        official_build_id: Some("20190301.1".to_string()),
        vs_branch: Some("main".to_string()),
        vs_drop_name: Some("Products/Roslyn".to_string()),
        vs_drop_access_token: Some("secret".to_string()),
        ..Default::default()
    });

    let result = fixture.pipeline().run(&config, &layout).await;
    assert_eq!(result.exit_code, 1);
    assert!(matches!(
        result.error,
        Some(BuildError::Tool(ToolError::Missing { .. }))
    ));
    assert!(fixture.runner.calls().is_empty());
}

#[tokio::test]
#[serial]
async fn test_failing_test_run_still_cleans_up() {
    clear_ide_env();
    let fixture = Fixture::new();
    let layout = fixture.layout(BuildConfiguration::Debug);
    fixture.install_test_runner(&layout);
    touch(
        &layout
            .bin_dir()
            .join("Foo.UnitTests/Debug/net472/Foo.UnitTests.dll"),
    );

    fixture.runner.watch_env(IOPERATION_ENV);
    fixture.runner.set_exit_code("RunTests.exe", 3);
    fixture.processes.spawn(10, "xunit.console.x86.exe", "");
    fixture.processes.spawn(11, "xunit.console.exe", "");
    fixture.processes.spawn(12, "devenv.exe", "");

    let config = configuration(RawFlags {
        test_ioperation: true,
        ..Default::default()
    });

    let result = fixture.pipeline().run(&config, &layout).await;
    assert_eq!(result.exit_code, 1);
    assert!(matches!(
        result.error,
        Some(BuildError::Tool(ToolError::Failed { code: 3, .. }))
    ));

    let calls = fixture.runner.calls_to("RunTests.exe");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].env[IOPERATION_ENV].as_deref(), Some("true"));
    assert!(calls[0]
        .args
        .last()
        .unwrap()
        .ends_with("Foo.UnitTests.dll"));

    assert!(std::env::var_os(IOPERATION_ENV).is_none());
    assert!(!fixture.processes.is_running("xunit.console.x86.exe"));
    assert!(!fixture.processes.is_running("xunit.console.exe"));
    assert!(fixture.processes.is_running("devenv.exe"));
}

#[tokio::test]
#[serial]
async fn test_vsi_run_deploys_extensions_in_order() {
    clear_ide_env();
    let mut fixture = Fixture::new();
    fixture.tools.vsix_installer = Some(fixture.fake_tool("VsixExpInstaller.exe"));
    let layout = fixture.layout(BuildConfiguration::Debug);
    fixture.install_test_runner(&layout);

    // Discovery order is alphabetical; install order must not be.
    for name in DEPLOYMENT_ORDER.iter().rev() {
        touch(&layout.vs_setup_dir().join(name));
    }
    touch(&layout.vs_setup_dir().join("Unrelated.vsix"));

    let cache = fixture
        .scratch
        .path()
        .join("LocalAppData/Microsoft/VisualStudio/16.0_abc123RoslynDev");
    fs::create_dir_all(cache.join("Extensions/Old")).unwrap();

    let config = configuration(RawFlags {
        test_vsi: true,
        ..Default::default()
    });

    let result = fixture.pipeline().run(&config, &layout).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert!(!cache.exists());

    let installed: Vec<String> = fixture
        .runner
        .calls_to("VsixExpInstaller.exe")
        .iter()
        .map(|call| {
            PathBuf::from(call.args.last().unwrap())
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(installed, DEPLOYMENT_ORDER.to_vec());
    assert_eq!(fixture.runner.tool_sequence().last().unwrap(), "RunTests.exe");
}

#[tokio::test]
#[serial]
async fn test_missing_test_runner_is_reported() {
    clear_ide_env();
    let fixture = Fixture::new();
    let layout = fixture.layout(BuildConfiguration::Debug);

    let config = configuration(RawFlags {
        test_desktop: true,
        ..Default::default()
    });

    let result = fixture.pipeline().run(&config, &layout).await;
    assert!(matches!(
        result.error,
        Some(BuildError::Tool(ToolError::TestRunnerMissing { .. }))
    ));
    assert!(fixture.runner.calls().is_empty());
}

#[tokio::test]
#[serial]
async fn test_launch_spawns_ide_detached() {
    clear_ide_env();
    let fixture = Fixture::new();
    let layout = fixture.layout(BuildConfiguration::Debug);

    let config = configuration(RawFlags {
        launch: true,
        ..Default::default()
    });

    let result = fixture.pipeline().run(&config, &layout).await;
    assert!(result.is_success(), "{:?}", result.error);

    let calls = fixture.runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].detached);
    assert_eq!(calls[0].tool(), "devenv.exe");
    assert_eq!(calls[0].args, vec!["/rootSuffix", "RoslynDev"]);
}

#[tokio::test]
#[serial]
async fn test_dotnet_engine_skips_ide_discovery() {
    clear_ide_env();
    let fixture = Fixture::new();
    let layout = fixture.layout(BuildConfiguration::Debug);

    let config = configuration(RawFlags {
        restore: true,
        msbuild_engine: BuildEngine::Dotnet,
        ..Default::default()
    });

    let result = fixture.pipeline().run(&config, &layout).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(fixture.locator.lookups(), 0);

    let calls = fixture.runner.calls();
    assert_eq!(calls[0].tool(), "dotnet");
    assert_eq!(calls[0].args[0], "msbuild");
}

#[tokio::test]
#[serial]
async fn test_working_directory_restored() {
    clear_ide_env();
    let before = std::env::current_dir().unwrap();

    let fixture = Fixture::new();
    let layout = fixture.layout(BuildConfiguration::Debug);
    let success = fixture
        .pipeline()
        .run(&configuration(RawFlags::default()), &layout)
        .await;
    assert!(success.is_success());
    assert_eq!(std::env::current_dir().unwrap(), before);

    fixture.runner.set_exit_code("dotnet", 1);
    let failure = fixture
        .pipeline()
        .run(
            &configuration(RawFlags {
                build: true,
                msbuild_engine: BuildEngine::Dotnet,
                ..Default::default()
            }),
            &layout,
        )
        .await;
    assert!(!failure.is_success());
    assert_eq!(std::env::current_dir().unwrap(), before);
}

#[test]
#[serial]
fn test_working_directory_restored_after_panic() {
    clear_ide_env();
    let before = std::env::current_dir().unwrap();

    let fixture = Fixture::new();
    fixture.runner.set_hook("dotnet", |_args| panic!("engine exploded"));
    let layout = fixture.layout(BuildConfiguration::Debug);
    let config = configuration(RawFlags {
        build: true,
        msbuild_engine: BuildEngine::Dotnet,
        ..Default::default()
    });
    let pipeline = fixture.pipeline();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runtime.block_on(pipeline.run(&config, &layout))
    }));

    assert!(outcome.is_err());
    assert_eq!(std::env::current_dir().unwrap(), before);
}
