// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The test case lifecycle engine.
//!
//! Every case moves through the same states: an applicability check that
//! runs before any target interaction, one-time setup, the assertion body,
//! and - only on failure - a post-mortem pass that captures extra target
//! state for triage. Cases execute independently: each gets a freshly
//! established debugger connection, and nothing a case leaves behind may
//! matter to the next one (when it does, that is a harness bug, not a
//! target bug).

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use crate::coordinator::Coordinator;
use crate::error::HarnessError;
use crate::session::Session;
use crate::target::{Hart, Target};
use crate::toolchain::Toolchain;

/// The classification every case invocation produces exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome
{
	Pass,
	/// An assertion mismatched: the target misbehaved
	Fail(String),
	/// The target lacks a capability the case needs; distinct from failure
	NotApplicable,
	/// The harness could not establish or keep its preconditions
	Error(String),
}

impl Outcome
{
	/// Whether this outcome leaves the run healthy
	pub fn is_acceptable(&self) -> bool
	{
		matches!(self, Outcome::Pass | Outcome::NotApplicable)
	}
}

impl Display for Outcome
{
	fn fmt(&self, formatter: &mut Formatter) -> fmt::Result
	{
		match self {
			Outcome::Pass => write!(formatter, "pass"),
			Outcome::Fail(reason) => write!(formatter, "FAIL: {reason}"),
			Outcome::NotApplicable => write!(formatter, "not applicable"),
			Outcome::Error(cause) => write!(formatter, "ERROR: {cause}"),
		}
	}
}

/// What a case body reports when it runs to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus
{
	Done,
	/// Applicability discovered only at runtime, e.g. after probing an
	/// optional register
	NotApplicable,
}

/// Everything a case may touch while it runs
pub struct TestContext<'run>
{
	pub target: &'run Target,
	pub coordinator: Coordinator,
	/// The compiled program image, when the case declared sources
	pub image: Option<PathBuf>,
}

impl TestContext<'_>
{
	/// The session single-hart cases drive directly
	pub fn session(&mut self) -> &mut Session
	{
		self.coordinator.primary_session()
	}

	pub fn primary_hart(&self) -> &Hart
	{
		self.target.primary_hart()
	}
}

/// A member of the case catalog. The registry is built at startup - a plain
/// list of values implementing this trait - never discovered by reflection.
pub trait TestCase
{
	fn name(&self) -> &'static str;

	/// Source files the toolchain compiles into this case's image
	fn sources(&self) -> &'static [&'static str]
	{
		&[]
	}

	/// Preprocessor defines handed to the toolchain alongside the sources
	fn defines(&self) -> &'static [&'static str]
	{
		&[]
	}

	/// Pure predicate over the target's capabilities, evaluated before any
	/// target interaction; returning false short-circuits to
	/// [`Outcome::NotApplicable`] with zero commands sent
	fn early_applicable(&self, _target: &Target) -> bool
	{
		true
	}

	/// One-time target preparation; failures here mean the harness could not
	/// establish preconditions and classify as [`Outcome::Error`]
	fn setup(&mut self, _ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		Ok(())
	}

	/// The assertion body
	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>;

	/// Capture extra target state after a failure; errors in here are
	/// swallowed and logged, never escalated
	fn post_mortem(&mut self, _ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		Ok(())
	}
}

/// Fail the case unless the condition holds
pub fn check(condition: bool, what: impl Into<String>) -> Result<(), HarnessError>
{
	if condition {
		Ok(())
	} else {
		Err(HarnessError::Assertion(what.into()))
	}
}

/// Fail the case unless the observed value matches the expected one
pub fn check_eq<ValueT>(actual: ValueT, expected: ValueT, what: &str) -> Result<(), HarnessError>
where
	ValueT: PartialEq + fmt::Debug,
{
	check(
		actual == expected,
		format!("{what}: expected {expected:?}, observed {actual:?}"),
	)
}

/// Fail the case if two observations that must differ are equal
pub fn check_ne<ValueT>(left: ValueT, right: ValueT, what: &str) -> Result<(), HarnessError>
where
	ValueT: PartialEq + fmt::Debug,
{
	check(left != right, format!("{what}: both sides are {left:?}"))
}

/// Fail the case unless the debugger output contains the expected phrase
pub fn check_in(haystack: &str, needle: &str) -> Result<(), HarnessError>
{
	check(
		haystack.contains(needle),
		format!("expected `{needle}` in debugger output, got `{haystack}`"),
	)
}

/// The explicit configuration value passed into the engine's entry point
pub struct RunConfig
{
	/// Only cases whose name contains this substring run
	pub filter: Option<String>,
	/// Per-blocking-call response budget handed to new sessions
	pub timeout: Duration,
	/// Whether to draw the case progress bar
	pub progress: bool,
}

impl Default for RunConfig
{
	fn default() -> Self
	{
		Self {
			filter: None,
			timeout: crate::session::DEFAULT_TIMEOUT,
			progress: true,
		}
	}
}

pub struct CaseReport
{
	pub name: &'static str,
	pub outcome: Outcome,
	pub duration: Duration,
}

pub struct Summary
{
	pub reports: Vec<CaseReport>,
}

impl Summary
{
	pub fn tally(&self) -> (usize, usize, usize, usize)
	{
		let mut passed = 0;
		let mut failed = 0;
		let mut not_applicable = 0;
		let mut errored = 0;
		for report in &self.reports {
			match report.outcome {
				Outcome::Pass => passed += 1,
				Outcome::Fail(_) => failed += 1,
				Outcome::NotApplicable => not_applicable += 1,
				Outcome::Error(_) => errored += 1,
			}
		}
		(passed, failed, not_applicable, errored)
	}

	/// Process exit code: zero iff every selected case passed or was
	/// not applicable
	pub fn exit_code(&self) -> i32
	{
		if self.reports.iter().all(|report| report.outcome.is_acceptable()) {
			0
		} else {
			1
		}
	}
}

/// How a fresh connection to the target is established for each case
pub type ConnectFn<'run> = dyn FnMut(&Target) -> Result<Coordinator, HarnessError> + 'run;

/// Run every selected case in the catalog against the target
pub fn run_catalog(
	target: &Target, toolchain: &Toolchain, connect: &mut ConnectFn, mut cases: Vec<Box<dyn TestCase>>,
	config: &RunConfig,
) -> Summary
{
	let selected: Vec<&mut Box<dyn TestCase>> = cases
		.iter_mut()
		.filter(|case| {
			config
				.filter
				.as_deref()
				.is_none_or(|filter| case.name().contains(filter))
		})
		.collect();

	let progress_bar = if config.progress {
		ProgressBar::new(selected.len() as u64).with_style(
			ProgressStyle::default_bar()
				.template(" {percent:>3}% |{bar:50}| {pos}/{len} [{elapsed}] {msg}")
				.unwrap(),
		)
	} else {
		ProgressBar::hidden()
	};

	let mut reports = Vec::new();
	for case in selected {
		progress_bar.set_message(case.name());
		let started = Instant::now();
		let outcome = run_case(target, toolchain, connect, case.as_mut());
		let duration = started.elapsed();
		info!("{}: {} ({:.1?})", case.name(), outcome, duration);
		reports.push(CaseReport {
			name: case.name(),
			outcome,
			duration,
		});
		progress_bar.inc(1);
	}
	progress_bar.finish_and_clear();

	Summary {
		reports,
	}
}

fn run_case(
	target: &Target, toolchain: &Toolchain, connect: &mut ConnectFn, case: &mut dyn TestCase,
) -> Outcome
{
	// Capability gates short-circuit before the debugger is even spawned
	if !case.early_applicable(target) {
		return Outcome::NotApplicable;
	}

	let image = if case.sources().is_empty() {
		None
	} else {
		match toolchain.compile(target.primary_hart(), case.sources(), case.defines()) {
			Ok(image) => Some(image),
			Err(error) => return Outcome::Error(error.to_string()),
		}
	};

	let coordinator = match connect(target) {
		Ok(coordinator) => coordinator,
		Err(error) => return Outcome::Error(error.to_string()),
	};
	let mut ctx = TestContext {
		target,
		coordinator,
		image: image.clone(),
	};

	// Every connection gets the image so symbols resolve on all of them
	if let Some(image) = &image {
		if let Err(error) = ctx.coordinator.for_each_session(|session| session.file(image)) {
			return Outcome::Error(error.to_string());
		}
	}

	if let Err(error) = case.setup(&mut ctx) {
		let outcome = Outcome::Error(format!("setup failed: {error}"));
		run_post_mortem(case, &mut ctx);
		return outcome;
	}

	let outcome = match case.test(&mut ctx) {
		Ok(TestStatus::Done) => Outcome::Pass,
		Ok(TestStatus::NotApplicable) => Outcome::NotApplicable,
		Err(HarnessError::Assertion(reason)) => Outcome::Fail(reason),
		Err(error) => Outcome::Error(error.to_string()),
	};
	if !outcome.is_acceptable() {
		run_post_mortem(case, &mut ctx);
	}
	outcome
}

fn run_post_mortem(case: &mut dyn TestCase, ctx: &mut TestContext)
{
	if let Err(error) = case.post_mortem(ctx) {
		// Post-mortem exists to enrich a failure report; its own troubles
		// must never change the outcome
		warn!("{}: post-mortem capture failed: {}", case.name(), error);
	}
}
