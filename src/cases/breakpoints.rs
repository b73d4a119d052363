// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Breakpoint cases: software and hardware breakpoints, trigger exhaustion.

use crate::error::HarnessError;
use crate::lifecycle::{TestCase, TestContext, TestStatus, check, check_eq, check_in};
use crate::session::ValueFormat;
use crate::target::Target;

const DEBUG_SOURCES: &[&str] = &["programs/debug.c"];

/// What the fixture program reports once its buffer survived rot13 twice
fn expected_status() -> u64
{
	// Mirrors the program's checksum(): rot13 twice is the identity
	let fox = "The quick brown fox jumps over the lazy dog.";
	u64::from(
		fox.bytes()
			.fold(0u32, |sum, byte| sum.wrapping_mul(31).wrapping_add(u32::from(byte))),
	)
}

fn check_breakpoint_report(report: &str, symbol: &str) -> Result<(), HarnessError>
{
	// Both spellings appear in the wild depending on breakpoint kind
	check(
		report.contains("Breakpoint") || report.contains("breakpoint"),
		format!("expected a breakpoint hit report, got `{report}`"),
	)?;
	check_in(report, symbol)
}

/// A breakpoint on `rot13` is hit exactly twice, then the program runs to
/// its exit and reports the right checksum.
pub struct BreakpointSymbols;

impl TestCase for BreakpointSymbols
{
	fn name(&self) -> &'static str
	{
		"BreakpointSymbols"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		DEBUG_SOURCES
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		let session = ctx.session();
		session.load()?;
		session.break_at("_exit")
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let session = ctx.session();
		session.break_at("rot13")?;
		for _ in 0..2 {
			let report = session.continue_exec(true, None)?;
			check_breakpoint_report(&report, "rot13")?;
		}
		let report = session.continue_exec(true, None)?;
		check_breakpoint_report(&report, "_exit")?;
		check_eq(session.eval_u64("status")?, expected_status(), "program checksum")?;
		Ok(TestStatus::Done)
	}
}

/// The hardware flavor of the same double-hit, on targets with at least one
/// instruction trigger.
pub struct HardwareBreakpoint;

impl TestCase for HardwareBreakpoint
{
	fn name(&self) -> &'static str
	{
		"HardwareBreakpoint"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		DEBUG_SOURCES
	}

	fn early_applicable(&self, target: &Target) -> bool
	{
		target.primary_hart().instruction_hardware_breakpoint_count >= 1
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		let session = ctx.session();
		session.load()?;
		session.break_at("_exit")
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let honors_hmode = ctx.primary_hart().honors_tdata1_hmode;
		let session = ctx.session();
		if !honors_hmode {
			// Startup code would clear the trigger, so get past it first
			session.break_at("main")?;
			let _ = session.continue_exec(true, None)?;
		}
		session.hardware_break_at("rot13")?;
		for _ in 0..2 {
			let report = session.continue_exec(true, None)?;
			check_breakpoint_report(&report, "rot13")?;
		}
		let report = session.continue_exec(true, None)?;
		check_breakpoint_report(&report, "_exit")?;
		Ok(TestStatus::Done)
	}
}

/// Demanding more hardware breakpoints than the target implements must be
/// reported through the exhaustion phrase, then cleaned up: triggers live in
/// hardware and outlive this connection.
pub struct HardwareBreakpointExhaustion;

const DEMAND: u32 = 30;

impl TestCase for HardwareBreakpointExhaustion
{
	fn name(&self) -> &'static str
	{
		"HardwareBreakpointExhaustion"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		DEBUG_SOURCES
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		ctx.session().load()
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		if ctx.primary_hart().instruction_hardware_breakpoint_count >= DEMAND {
			return Ok(TestStatus::NotApplicable);
		}

		let session = ctx.session();
		let mut exhausted = false;
		for index in 0..DEMAND {
			match session.hardware_break_at(&format!("*rot13 + {}", index * 4)) {
				Ok(()) => {},
				Err(HarnessError::ResourceExhausted {
					..
				}) => {
					exhausted = true;
					break;
				},
				Err(error) => return Err(error),
			}
		}
		if !exhausted {
			// Insertion may be deferred to resume time
			match session.continue_exec(true, None) {
				Ok(_) => {},
				Err(HarnessError::ResourceExhausted {
					..
				}) => exhausted = true,
				Err(error) => return Err(error),
			}
		}
		session.delete_breakpoints()?;
		check(exhausted, "the target accepted more hardware breakpoints than it implements")?;
		Ok(TestStatus::Done)
	}

	fn post_mortem(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		// Record what the debugger thinks is installed
		let _ = ctx.session().command("info breakpoints")?;
		let _ = ctx.session().evaluate("$pc", ValueFormat::Hex)?;
		Ok(())
	}
}
