// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Trigger hardware cases: control word verification via the on-target dump.

use crate::cases::xlen_type;
use crate::error::HarnessError;
use crate::lifecycle::{TestCase, TestContext, TestStatus, check, check_eq, check_in};
use crate::session::{Session, WatchKind};
use crate::target::{Hart, Target};
use crate::trigger;

/// Read the zero-terminated (tdata1, tdata2) pairs the fixture program
/// dumped into its `data` buffer
fn read_inventory(session: &mut Session, hart: &Hart) -> Result<Vec<(u64, u64)>, HarnessError>
{
	let word = xlen_type(hart);
	let mut inventory = Vec::new();
	for index in 0..16 {
		let tdata1 = session.eval_u64(&format!("(({word} *)&data)[{}]", 2 * index))?;
		if tdata1 == 0 {
			break;
		}
		let tdata2 = session.eval_u64(&format!("(({word} *)&data)[{}]", 2 * index + 1))?;
		inventory.push((tdata1, tdata2));
	}
	Ok(inventory)
}

/// After arming a trigger, the dumped inventory must show exactly one
/// dmode-marked trigger (the debugger's own) and every other slot carrying
/// the control bits the program wrote.
pub struct TriggerInventory;

impl TestCase for TriggerInventory
{
	fn name(&self) -> &'static str
	{
		"TriggerInventory"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		&["programs/trigger.S"]
	}

	fn early_applicable(&self, target: &Target) -> bool
	{
		// Without dmode protection the program's own arming would clobber
		// the debugger's trigger and the invariant cannot hold
		target.primary_hart().honors_tdata1_hmode && target.primary_hart().instruction_hardware_breakpoint_count >= 1
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		let session = ctx.session();
		session.load()?;
		session.hardware_break_at("write_load_trigger")?;
		session.break_at("clear_triggers")?;
		let _ = session.eval_u64("$pc=write_store_trigger")?;
		Ok(())
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let hart = ctx.primary_hart().clone();
		let session = ctx.session();

		let report = session.continue_exec(true, None)?;
		check_in(&report, "write_load_trigger")?;
		let inventory = read_inventory(session, &hart)?;
		trigger::verify_inventory(hart.xlen, &inventory, (1 << 6) | (1 << 1))?;

		let report = session.continue_exec(true, None)?;
		check_in(&report, "clear_triggers")?;
		let inventory = read_inventory(session, &hart)?;
		trigger::verify_inventory(hart.xlen, &inventory, (1 << 6) | (1 << 0))?;
		Ok(TestStatus::Done)
	}
}

/// Data watchpoints on the fixture's `data` buffer must fire on the store
/// and load loops, halting with the accessed address in a0.
///
/// The halt may land on the access instruction or just past it depending on
/// how the hardware times trigger delivery; both are accepted.
pub struct TriggerAddressWatch;

impl TestCase for TriggerAddressWatch
{
	fn name(&self) -> &'static str
	{
		"TriggerAddressWatch"
	}

	fn sources(&self) -> &'static [&'static str]
	{
		&["programs/trigger.S"]
	}

	fn early_applicable(&self, target: &Target) -> bool
	{
		target.primary_hart().instruction_hardware_breakpoint_count >= 1
	}

	fn setup(&mut self, ctx: &mut TestContext) -> Result<(), HarnessError>
	{
		let session = ctx.session();
		session.load()?;
		session.break_at("just_before_write_loop")?;
		// Skip the arming preamble, it would clobber the watch triggers
		let _ = session.eval_u64("$pc=clear_triggers")?;
		Ok(())
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let session = ctx.session();
		let report = session.continue_exec(true, None)?;
		check_in(&report, "just_before_write_loop")?;
		let write_loop = session.eval_u64("&write_loop")?;
		let data = session.eval_u64("&data")?;

		session.watch_at("data", WatchKind::Write)?;
		let _ = session.continue_exec(true, None)?;
		let pc = session.eval_u64("$pc")?;
		check(
			pc >= write_loop && pc <= write_loop + 12,
			format!("store watch halted at {pc:#x}, far from write_loop {write_loop:#x}"),
		)?;
		check_eq(session.eval_u64("$a0")?, data, "watched store address")?;
		session.delete_breakpoints()?;

		session.break_at("just_before_read_loop")?;
		let report = session.continue_exec(true, None)?;
		check_in(&report, "just_before_read_loop")?;
		let read_loop = session.eval_u64("&read_loop")?;

		session.watch_at("data", WatchKind::Read)?;
		let _ = session.continue_exec(true, None)?;
		let pc = session.eval_u64("$pc")?;
		check(
			pc >= read_loop && pc <= read_loop + 12,
			format!("load watch halted at {pc:#x}, far from read_loop {read_loop:#x}"),
		)?;
		check_eq(session.eval_u64("$a0")?, data, "watched load address")?;
		session.delete_breakpoints()?;
		Ok(TestStatus::Done)
	}
}
