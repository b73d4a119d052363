// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The built-in case catalog.
//!
//! Everything in here is test content riding on the engine: each case is a
//! value implementing [`TestCase`], registered in [`catalog`] at startup.
//! Cases assume nothing about each other and get a fresh connection each.

use crate::lifecycle::TestCase;
use crate::target::Hart;

mod breakpoints;
mod execution;
mod memory;
mod triggers;

pub const MSTATUS_MIE: u64 = 0x0000_0008;
pub const MSTATUS_MPRV: u64 = 0x0002_0000;
pub const MSTATUS_VM: u64 = 0x1f00_0000;

/// The C type matching the hart's machine word, for dereference expressions
pub(crate) fn xlen_type(hart: &Hart) -> &'static str
{
	if hart.xlen == 32 { "int" } else { "long long" }
}

/// Truncate a pattern to an access width in bytes
pub(crate) fn mask_to(size: u32, pattern: u64) -> u64
{
	if size >= 8 {
		pattern
	} else {
		pattern & ((1u64 << (size * 8)) - 1)
	}
}

/// Truncate a pattern to the hart's register width
pub(crate) fn mask_to_xlen(hart: &Hart, pattern: u64) -> u64
{
	mask_to(hart.xlen / 8, pattern)
}

/// Build the full catalog, in the order the cases run
pub fn catalog() -> Vec<Box<dyn TestCase>>
{
	vec![
		Box::new(execution::RegisterReadWrite),
		Box::new(memory::MemoryAccessWidths),
		Box::new(memory::MemoryBlockTransfer),
		Box::new(memory::MemoryFaultReporting),
		Box::new(breakpoints::BreakpointSymbols),
		Box::new(breakpoints::HardwareBreakpoint),
		Box::new(breakpoints::HardwareBreakpointExhaustion),
		Box::new(triggers::TriggerInventory),
		Box::new(triggers::TriggerAddressWatch),
		Box::new(execution::InterruptFreeRunning),
		Box::new(execution::TimerInterrupt),
		Box::new(execution::MulticoreRunHaltStep),
		Box::new(execution::ResetVectors),
	]
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn catalog_names_are_unique()
	{
		let catalog = catalog();
		for (position, case) in catalog.iter().enumerate() {
			let duplicates = catalog
				.iter()
				.filter(|other| other.name() == case.name())
				.count();
			assert_eq!(duplicates, 1, "case {position} ({}) is not unique", case.name());
		}
	}

	#[test]
	fn masks_clip_to_width()
	{
		assert_eq!(mask_to(2, 0xdead_beef_1234_5678), 0x5678);
		assert_eq!(mask_to(4, 0xdead_beef_1234_5678), 0x1234_5678);
		assert_eq!(mask_to(8, 0xdead_beef_1234_5678), 0xdead_beef_1234_5678);
	}
}
