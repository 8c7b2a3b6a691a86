//! Core library for the build pipeline controller
//!
//! This crate validates command-line intent into a single immutable
//! configuration and sequences the external collaborators of a build: the
//! build engine, the optimization-data tools, the test runner and the IDE
//! extension installer.

pub mod archive;
pub mod bootstrap;
pub mod build_engine;
pub mod config;
pub mod controller;
pub mod deploy;
pub mod errors;
pub mod http;
pub mod hygiene;
pub mod layout;
pub mod logging;
pub mod observability;
pub mod optprof;
pub mod phase;
pub mod process;
pub mod scope;
pub mod test_run;
pub mod tools;

pub use config::{validate, Configuration, RawFlags, Validated};
pub use controller::{Pipeline, PipelineResult};
pub use errors::{BuildError, Result};
pub use layout::RepoLayout;
