// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Module for error handling code.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError
{
	#[error("debugger returned an unexpected response to `{command}`: {response}")]
	Protocol
	{
		/// The command that was on the wire when the response arrived.
		command: String,

		/// What the debugger actually said (possibly empty).
		response: String,
	},

	#[error("`{command}` did not complete within {budget:?}")]
	Timeout
	{
		command: String,
		budget: Duration,
	},

	#[error("target is out of hardware breakpoints installing one at {location}")]
	ResourceExhausted
	{
		location: String,
	},

	#[error("target faulted accessing memory at {address:#x}")]
	CannotAccess
	{
		address: u64,
	},

	#[error("debugger could not evaluate `{expression}`: {detail}")]
	Evaluation
	{
		expression: String,
		detail: String,
	},

	#[error("target did not halt within {grace:?} of the interrupt request")]
	Interrupt
	{
		grace: Duration,
	},

	#[error("image load failed: {0}")]
	Load(String),

	#[error("bulk memory transfer failed: {0}")]
	Transfer(String),

	#[error("malformed Intel HEX record `{line}`: {detail}")]
	MalformedRecord
	{
		line: String,
		detail: &'static str,
	},

	#[error("compiling {sources} failed: {detail}")]
	Compile
	{
		sources: String,
		detail: String,
	},

	#[error("target descriptor invalid: {0}")]
	Descriptor(String),

	#[error("{0}")]
	Assertion(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl HarnessError
{
	/// Capability-driven conditions are expected data for a test case to act on,
	/// not a harness defect (see the lifecycle engine's outcome classification)
	pub fn is_capability_condition(&self) -> bool
	{
		matches!(self, HarnessError::ResourceExhausted { .. } | HarnessError::Evaluation { .. })
	}
}
