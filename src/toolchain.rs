// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Cross-compiler adapter producing loadable test program images.
//!
//! The harness doesn't care how the toolchain works, only that handing it
//! source files and preprocessor defines yields a path to an image the
//! debugger can `file`/`load`. Each case gets a fresh artifact.

use std::path::PathBuf;
use std::process::Command;

use log::{debug, info};

use crate::error::HarnessError;
use crate::target::Hart;

pub struct Toolchain
{
	compiler: String,
}

impl Default for Toolchain
{
	fn default() -> Self
	{
		// The multilib cross compiler builds for either xlen via -march/-mabi
		Self::new("riscv64-unknown-elf-gcc")
	}
}

impl Toolchain
{
	pub fn new(compiler: impl Into<String>) -> Self
	{
		Self {
			compiler: compiler.into(),
		}
	}

	fn march(hart: &Hart) -> String
	{
		let extensions = if hart.extensions.is_empty() {
			"i"
		} else {
			&hart.extensions
		};
		format!("rv{}{}", hart.xlen, extensions.to_lowercase())
	}

	fn mabi(hart: &Hart) -> &'static str
	{
		if hart.xlen == 32 {
			if hart.extension_supported('d') { "ilp32d" } else { "ilp32" }
		} else if hart.extension_supported('d') {
			"lp64d"
		} else {
			"lp64"
		}
	}

	/// Compile the named sources plus defines into an image linked at the
	/// hart's RAM base, returning the artifact path
	pub fn compile(&self, hart: &Hart, sources: &[&str], defines: &[&str]) -> Result<PathBuf, HarnessError>
	{
		let artifact = tempfile::Builder::new()
			.prefix("rvdbgtest-")
			.suffix(".elf")
			.tempfile()?;
		// The image outlives the compile call; the OS reclaims it with the
		// rest of the temp directory
		let (_, artifact) = artifact.keep().map_err(|error| HarnessError::Io(error.error))?;

		let mut command = Command::new(&self.compiler);
		command
			.arg(format!("-march={}", Self::march(hart)))
			.arg(format!("-mabi={}", Self::mabi(hart)))
			.arg("-mcmodel=medany")
			.arg("-g")
			.arg("-O0")
			.arg("-nostartfiles")
			.arg(format!("-Ttext={:#x}", hart.ram))
			.arg("-o")
			.arg(&artifact);
		for define in defines {
			command.arg(format!("-D{define}"));
		}
		command.args(sources);

		debug!("compiling: {command:?}");
		let output = command.output().map_err(|error| HarnessError::Compile {
			sources: sources.join(" "),
			detail: format!("failed to run {}: {}", self.compiler, error),
		})?;
		if !output.status.success() {
			return Err(HarnessError::Compile {
				sources: sources.join(" "),
				detail: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}
		info!("compiled {} -> {}", sources.join(" "), artifact.display());
		Ok(artifact)
	}
}
