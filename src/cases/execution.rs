// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Run-control cases: registers, reset state, asynchronous interrupts and
//! multicore coherence.

use crate::cases::{MSTATUS_MIE, MSTATUS_MPRV, MSTATUS_VM, mask_to_xlen, xlen_type};
use crate::error::HarnessError;
use crate::lifecycle::{TestCase, TestContext, TestStatus, check, check_eq, check_in, check_ne};
use crate::target::Target;

/// Registers written through either their ABI name or their numeric alias
/// must read back identically through both, including across a single step.
pub struct RegisterReadWrite;

const REGISTER_ALIASES: &[(&str, &str)] = &[("s0", "x8"), ("s1", "x9"), ("t0", "x5"), ("t1", "x6")];

impl TestCase for RegisterReadWrite
{
	fn name(&self) -> &'static str
	{
		"RegisterReadWrite"
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		let ram = ctx.primary_hart().ram;
		let session = ctx.session();
		// A runway of nops so single stepping has somewhere safe to go
		// (0x13 is addi x0, x0, 0)
		for offset in (0..20).step_by(4) {
			let _ = session.eval_u64(&format!("*((int*){:#x}) = 0x13", ram + offset))?;
		}
		let _ = session.eval_u64(&format!("$pc = {ram:#x}"))?;
		Ok(())
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let hart = ctx.primary_hart().clone();
		let a = mask_to_xlen(&hart, 0x5555_aaaa_3333_cccc);
		let b = mask_to_xlen(&hart, 0xdead_beef_1234_5678);
		let session = ctx.session();
		for (name, alias) in REGISTER_ALIASES {
			let _ = session.eval_u64(&format!("${name} = {a:#x}"))?;
			check_eq(session.eval_u64(&format!("${alias}"))?, a, alias)?;
			let _ = session.step_instruction()?;
			check_eq(session.eval_u64(&format!("${name}"))?, a, name)?;
			check_eq(session.eval_u64(&format!("${alias}"))?, a, alias)?;

			let _ = session.eval_u64(&format!("${alias} = {b:#x}"))?;
			check_eq(session.eval_u64(&format!("${name}"))?, b, name)?;
			let _ = session.step_instruction()?;
			check_eq(session.eval_u64(&format!("${name}"))?, b, name)?;
			check_eq(session.eval_u64(&format!("${alias}"))?, b, alias)?;
		}
		Ok(TestStatus::Done)
	}
}

/// `monitor reset halt` must leave every hart at one of its reset vectors
/// with interrupts and address translation off.
pub struct ResetVectors;

impl TestCase for ResetVectors
{
	fn name(&self) -> &'static str
	{
		"ResetVectors"
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let _ = ctx.session().monitor("reset halt")?;
		// Cached register values predate the reset
		let _ = ctx.session().command("flushregs")?;

		let harts = ctx.coordinator.harts().to_vec();
		for hart in &harts {
			let session = ctx.coordinator.session_for(hart)?;
			let pc = session.eval_u64("$pc")?;
			check(
				hart.reset_vectors.contains(&pc),
				format!("hart {} reset to {:#x}, not a known reset vector", hart.index, pc),
			)?;
		}

		// mcycle and minstret have no defined reset value; mstatus does
		let mstatus = ctx.session().eval_u64("$mstatus")?;
		check_eq(mstatus & (MSTATUS_MIE | MSTATUS_MPRV | MSTATUS_VM), 0, "mstatus reset state")?;
		Ok(TestStatus::Done)
	}
}

/// An out-of-band interrupt must halt a free-running program, observed via
/// a loop counter only a running target can advance.
pub struct InterruptFreeRunning;

impl TestCase for InterruptFreeRunning
{
	fn name(&self) -> &'static str
	{
		"InterruptFreeRunning"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		&["programs/debug.c"]
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		let session = ctx.session();
		session.load()?;
		session.break_at("main:start")
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		{
			let session = ctx.session();
			let report = session.continue_exec(true, None)?;
			check_in(&report, "main")?;
			// Arm the spin loop, then cut the target loose
			let _ = session.eval_u64("i = 123")?;
			session.delete_breakpoints()?;
		}

		let _ = ctx.coordinator.run_all(false, None)?;
		let reports = ctx.coordinator.halt_all()?;
		check(
			reports.iter().any(|report| report.contains("main")),
			format!("no hart halted back in main: {reports:?}"),
		)?;

		let session = ctx.session();
		let progress = session.eval_u64("j")?;
		check(progress > 10, format!("loop counter only reached {progress}"))?;

		// Unstick the loop and let the program run out
		let _ = session.eval_u64("i = 0")?;
		session.break_at("_exit")?;
		let report = session.continue_exec(true, None)?;
		check_in(&report, "_exit")?;
		Ok(TestStatus::Done)
	}
}

/// Timer interrupts and the foreground loop must both make progress across
/// repeated run/halt cycles.
pub struct TimerInterrupt;

impl TestCase for TimerInterrupt
{
	fn name(&self) -> &'static str
	{
		"TimerInterrupt"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		&["programs/interrupt.c"]
	}

	fn early_applicable(&self, target: &Target) -> bool
	{
		target.supports_clint_mtime
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		ctx.session().load()
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		{
			let session = ctx.session();
			session.break_at("main")?;
			let report = session.continue_exec(true, None)?;
			check_in(&report, "main")?;
			session.break_at("trap_entry")?;
			let report = session.continue_exec(true, None)?;
			check_in(&report, "trap_entry")?;
			session.delete_breakpoints()?;
		}

		let mut interrupts = 0;
		let mut foreground = 0;
		for _ in 0..10 {
			let _ = ctx.coordinator.run_all(false, None)?;
			let _ = ctx.coordinator.halt_all()?;
			let session = ctx.session();
			interrupts = session.eval_u64("interrupt_count")?;
			foreground = session.eval_u64("local")?;
			if interrupts > 1000 && foreground > 1000 {
				return Ok(TestStatus::Done);
			}
		}
		check(interrupts > 1000, format!("only {interrupts} timer interrupts delivered"))?;
		check(foreground > 1000, format!("foreground loop only reached {foreground}"))?;
		Ok(TestStatus::Done)
	}

	fn post_mortem(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		// Timer state plus both counters, for the log
		let session = ctx.session();
		let _ = session.eval_u64("*((long long*) 0x200bff8)")?;
		let _ = session.eval_u64("*((long long*) 0x2004000)")?;
		let _ = session.eval_u64("interrupt_count")?;
		let _ = session.eval_u64("local")?;
		Ok(())
	}
}

/// Run all harts, halt all harts, and confirm each one both made progress
/// and single-steps cleanly from wherever it stopped.
pub struct MulticoreRunHaltStep;

impl TestCase for MulticoreRunHaltStep
{
	fn name(&self) -> &'static str
	{
		"MulticoreRunHaltStep"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		&["programs/multicore.S"]
	}

	fn early_applicable(&self, target: &Target) -> bool
	{
		target.harts.len() > 1
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		ctx.session().load()?;
		ctx.coordinator
			.for_each_hart(|session, _| session.eval_u64("$pc = _start").map(|_| ()))
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let harts = ctx.coordinator.harts().to_vec();
		let word = xlen_type(&harts[0]);
		let mut previous = vec![0u64; harts.len()];

		for round in 0..2 {
			let _ = ctx.coordinator.run_all(false, None)?;
			let reports = ctx.coordinator.halt_all()?;
			check_eq(reports.len(), harts.len(), "halt report count")?;

			for (position, hart) in harts.iter().enumerate() {
				let session = ctx.coordinator.session_for(hart)?;
				let counter =
					session.eval_u64(&format!("(({word} *)&counters)[{}]", hart.index))?;
				check(
					counter > previous[position],
					format!("hart {} made no progress in round {round}", hart.index),
				)?;
				previous[position] = counter;

				let before = session.eval_u64("$pc")?;
				let _ = session.step_instruction()?;
				let after = session.eval_u64("$pc")?;
				check_ne(before, after, &format!("hart {} pc across stepi", hart.index))?;
			}
		}
		Ok(TestStatus::Done)
	}
}
