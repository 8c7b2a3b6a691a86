//! Standardized tracing spans for pipeline phases
//!
//! Every phase and every collaborator call runs inside a named span so that
//! JSON logs can be correlated per phase.

use crate::phase::Phase;
use std::time::Instant;
use tracing::{span, Span};

/// Canonical span names
pub mod spans {
    pub const OPTPROF_ACQUIRE: &str = "optprof.acquire";
    pub const OPTPROF_GENERATE: &str = "optprof.generate";
    pub const BOOTSTRAP: &str = "pipeline.bootstrap";
    pub const BUILD_ENGINE: &str = "build.engine";
    pub const STAGE_TEMPLATES: &str = "ci.stage_templates";
    pub const TEST_RUN: &str = "test.run";
    pub const EXTENSION_DEPLOY: &str = "extension.deploy";
    pub const TOOL_EXEC: &str = "tool.exec";
}

/// Common field names for structured logging
pub mod fields {
    pub const PHASE: &str = "phase";
    pub const TOOL: &str = "tool";
    pub const EXIT_CODE: &str = "exit_code";
    pub const DURATION_MS: &str = "duration_ms";
}

/// Span covering one pipeline phase
pub fn phase_span(phase: Phase) -> Span {
    span!(
        target: "buildctl_core::observability",
        tracing::Level::INFO,
        "pipeline.phase",
        phase = %phase,
        duration_ms = tracing::field::Empty
    )
}

/// Span covering a named collaborator step (one of [`spans`])
pub fn step_span(name: &'static str) -> Span {
    span!(
        target: "buildctl_core::observability",
        tracing::Level::INFO,
        "pipeline.step",
        step = name,
        duration_ms = tracing::field::Empty
    )
}

/// Span covering a single external tool invocation
pub fn tool_span(tool: &str) -> Span {
    span!(
        target: "buildctl_core::observability",
        tracing::Level::DEBUG,
        spans::TOOL_EXEC,
        tool = %tool,
        exit_code = tracing::field::Empty
    )
}

/// Records elapsed time on a span when dropped
pub struct TimedSpan {
    span: Span,
    start: Instant,
}

impl TimedSpan {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for TimedSpan {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        self.span.record(fields::DURATION_MS, duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_construct_without_subscriber() {
        let timed = TimedSpan::new(phase_span(Phase::Build));
        let _entered = timed.span().enter();
        let _tool = tool_span("msbuild");
        let _step = step_span(spans::TEST_RUN);
    }
}
