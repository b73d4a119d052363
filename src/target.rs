// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Target and hart capability descriptions.
//!
//! A target descriptor is a JSON document naming the debugger to launch and
//! describing every hart the target exposes. The capability values drive test
//! applicability decisions and are never probed twice: once deserialised and
//! validated, a [`Target`] is immutable for the whole run.

use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::error::HarnessError;

/// Static description of one hardware execution context's debug capabilities
#[derive(Debug, Clone, Deserialize)]
pub struct Hart
{
	/// Position of this hart in the target's hart sequence, unique per target
	pub index: u32,
	/// Machine word width in bits, 32 or 64
	pub xlen: u32,
	/// Single-letter ISA extensions this hart implements, e.g. "imafdc"
	#[serde(default)]
	pub extensions: String,
	/// Base address of the RAM region the harness may freely clobber
	pub ram: u64,
	/// Size of that region in bytes, always non-zero
	#[serde(rename = "ramSize")]
	pub ram_size: u64,
	/// Every address the hart may legally present as its post-reset PC
	#[serde(rename = "resetVectors")]
	pub reset_vectors: Vec<u64>,
	/// How many instruction-address triggers the hart implements
	#[serde(rename = "instructionHardwareBreakpointCount")]
	pub instruction_hardware_breakpoint_count: u32,
	/// Whether tdata1.dmode protects debugger-owned triggers from M-mode code
	#[serde(rename = "honorsTdata1Hmode")]
	pub honors_tdata1_hmode: bool,
	/// Reset value of misa, when the descriptor knows it
	#[serde(default)]
	pub misa: Option<u64>,
}

impl Hart
{
	/// Check whether this hart implements the given single-letter extension
	pub fn extension_supported(&self, extension: char) -> bool
	{
		self.extensions
			.chars()
			.any(|ext| ext.eq_ignore_ascii_case(&extension))
	}

	/// The last address of the hart's RAM region that can hold a value of `size` bytes
	pub fn ram_end_for(&self, size: u64) -> u64
	{
		self.ram + self.ram_size - size
	}
}

/// A target under test: one or more harts behind a debugger connection
#[derive(Debug, Clone, Deserialize)]
pub struct Target
{
	/// Human-readable name, used in logs and the run summary
	pub name: String,
	/// Command line that launches the external debugger for this target
	pub debugger: Vec<String>,
	/// Whether every hart needs its own debugger process rather than
	/// thread selection on a single connection
	#[serde(rename = "oneSessionPerHart", default)]
	pub one_session_per_hart: bool,
	/// Whether the target implements the CLINT mtime/mtimecmp timer
	#[serde(rename = "supportsClintMtime", default)]
	pub supports_clint_mtime: bool,
	/// The target's harts, in debugger thread order
	pub harts: Vec<Hart>,
}

impl Target
{
	/// Read and validate a target descriptor from a JSON file
	pub fn from_path(path: &Path) -> Result<Self, HarnessError>
	{
		let file = File::open(path)?;
		let target: Target = serde_json::from_reader(file)
			.map_err(|error| HarnessError::Descriptor(error.to_string()))?;
		target.validate()?;
		Ok(target)
	}

	/// The hart most cases run against when they don't iterate all of them
	pub fn primary_hart(&self) -> &Hart
	{
		// Validation guarantees at least one hart exists
		&self.harts[0]
	}

	fn validate(&self) -> Result<(), HarnessError>
	{
		if self.harts.is_empty() {
			return Err(HarnessError::Descriptor(format!("target {} describes no harts", self.name)));
		}
		if self.debugger.is_empty() {
			return Err(HarnessError::Descriptor(format!("target {} names no debugger command", self.name)));
		}
		for hart in &self.harts {
			if hart.xlen != 32 && hart.xlen != 64 {
				return Err(HarnessError::Descriptor(format!(
					"hart {} has unsupported xlen {}",
					hart.index, hart.xlen
				)));
			}
			if hart.ram_size == 0 {
				return Err(HarnessError::Descriptor(format!("hart {} has zero RAM", hart.index)));
			}
			let duplicates = self
				.harts
				.iter()
				.filter(|other| other.index == hart.index)
				.count();
			if duplicates != 1 {
				return Err(HarnessError::Descriptor(format!("hart index {} is not unique", hart.index)));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	fn hart() -> Hart
	{
		Hart {
			index: 0,
			xlen: 64,
			extensions: String::from("imafdc"),
			ram: 0x8000_0000,
			ram_size: 0x4000,
			reset_vectors: vec![0x1000],
			instruction_hardware_breakpoint_count: 2,
			honors_tdata1_hmode: true,
			misa: None,
		}
	}

	fn target(harts: Vec<Hart>) -> Target
	{
		Target {
			name: String::from("unit"),
			debugger: vec![String::from("gdb")],
			one_session_per_hart: false,
			supports_clint_mtime: true,
			harts,
		}
	}

	#[test]
	fn extension_lookup_is_case_insensitive()
	{
		let hart = hart();
		assert!(hart.extension_supported('C'));
		assert!(hart.extension_supported('f'));
		assert!(!hart.extension_supported('v'));
	}

	#[test]
	fn ram_end_accounts_for_access_size()
	{
		let hart = hart();
		assert_eq!(hart.ram_end_for(8), 0x8000_3ff8);
		assert_eq!(hart.ram_end_for(2), 0x8000_3ffe);
	}

	#[test]
	fn duplicate_hart_indices_are_rejected()
	{
		let mut second = hart();
		second.ram += 0x4000;
		let target = target(vec![hart(), second]);
		assert!(target.validate().is_err());
	}

	#[test]
	fn zero_ram_is_rejected()
	{
		let mut bad = hart();
		bad.ram_size = 0;
		assert!(target(vec![bad]).validate().is_err());
	}
}
