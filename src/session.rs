// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The stateful driver of the debugger's textual command/response protocol.
//!
//! A [`Session`] owns one connection to a debugger process, translates
//! structured debug operations into command lines, and parses the free-text
//! responses back into structured results. Responses are matched against a
//! small table of known phrases (see [`signals`]) - that table is a
//! compatibility contract with the external debugger's exact wording and
//! must be preserved byte for byte.
//!
//! The protocol is half duplex: a session has one logical thread of control
//! and refuses new commands while the target is running, until the one
//! cancellation primitive - [`Session::interrupt`] - resynchronises it.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use tempfile::NamedTempFile;

use crate::error::HarnessError;
use crate::ihex::{self, MemoryBlock};
use crate::target::Hart;
use crate::transport::{PROMPT, Transport};

/// Response budget for ordinary commands when the caller doesn't name one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Image loads push whole programs over the wire and get a longer leash
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(60);
/// Bulk memory transfers are bounded by block size, not program behavior
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);
/// How long an interrupted target gets to produce its halt report
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// The known debugger response phrases the harness treats as structured
/// signals. These strings are the debugger's own wording: changing them
/// breaks recognition against real debugger builds.
pub mod signals
{
	/// The target is out of instruction-address trigger slots
	pub const HARDWARE_BREAKPOINT_EXHAUSTED: &str = "Cannot insert hardware breakpoint";
	/// A memory access faulted; the faulting address follows the phrase
	pub const CANNOT_ACCESS: &str = "Cannot access memory at address ";
	/// An optional register is absent on this target
	pub const COULD_NOT_FETCH: &str = "Could not fetch register";
	/// The expression names a symbol the image doesn't have
	pub const NO_SYMBOL: &str = "No symbol";
}

/// How [`Session::evaluate`] asks for and interprets a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat
{
	/// Print in the expression's natural format and parse a scalar
	Natural,
	/// Force hexadecimal and parse a scalar
	Hex,
	/// Hand back the response text unparsed
	Raw,
}

/// A typed evaluation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value
{
	Integer(u64),
	Text(String),
}

impl Value
{
	pub fn as_u64(&self) -> Result<u64, HarnessError>
	{
		match self {
			Value::Integer(value) => Ok(*value),
			Value::Text(text) => Err(HarnessError::Evaluation {
				expression: String::new(),
				detail: format!("expected a scalar, got `{text}`"),
			}),
		}
	}

	pub fn as_text(&self) -> &str
	{
		match self {
			Value::Integer(_) => "",
			Value::Text(text) => text,
		}
	}
}

/// Encodings available for bulk memory transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat
{
	IntelHex,
}

/// Which accesses a data watchpoint fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind
{
	Write,
	Read,
}

pub struct Session
{
	transport: Box<dyn Transport>,
	/// Monotonically increasing command sequence, for the post-mortem journal
	sequence: u64,
	/// The hart all register/memory operations are scoped to right now
	selected_hart: u32,
	/// The last fully collected response
	response: String,
	/// Set once a continue is in flight (or a blocking call timed out,
	/// leaving the target state indeterminate)
	running: bool,
	default_timeout: Duration,
}

impl Session
{
	/// Take ownership of a transport and swallow the debugger's greeting
	pub fn new(transport: Box<dyn Transport>, default_timeout: Duration) -> Self
	{
		let mut session = Self {
			transport,
			sequence: 0,
			selected_hart: 0,
			response: String::new(),
			running: false,
			default_timeout,
		};
		session.drain_banner();
		session
	}

	pub fn sequence(&self) -> u64
	{
		self.sequence
	}

	pub fn selected_hart(&self) -> u32
	{
		self.selected_hart
	}

	pub fn last_response(&self) -> &str
	{
		&self.response
	}

	/// Startup chatter ends at the first prompt (or first quiet interval);
	/// none of it is response data
	fn drain_banner(&mut self)
	{
		let deadline = Instant::now() + Duration::from_secs(2);
		while Instant::now() < deadline {
			match self.transport.recv_line(Duration::from_millis(50)) {
				Ok(Some(line)) if is_prompt(&line) => break,
				Ok(Some(line)) => trace!("banner: {line}"),
				Ok(None) | Err(_) => break,
			}
		}
	}

	/// Issue a raw debugger command and return its response.
	///
	/// The structured operations below all come through here; the escape
	/// hatch is public because diagnostic commands (`monitor reset halt`,
	/// `compare-sections`, register listings) are free-form by nature.
	pub fn command(&mut self, command: &str) -> Result<String, HarnessError>
	{
		self.command_with_timeout(command, self.default_timeout)
	}

	pub fn command_with_timeout(&mut self, command: &str, timeout: Duration) -> Result<String, HarnessError>
	{
		self.ensure_halted(command)?;
		self.transmit(command)?;
		self.collect_response(command, timeout)
	}

	fn ensure_halted(&self, command: &str) -> Result<(), HarnessError>
	{
		if self.running {
			return Err(HarnessError::Protocol {
				command: command.to_string(),
				response: String::from("target is running; interrupt() must resynchronise the session first"),
			});
		}
		Ok(())
	}

	fn transmit(&mut self, command: &str) -> Result<(), HarnessError>
	{
		self.sequence += 1;
		debug!("[{}] hart{} -> {}", self.sequence, self.selected_hart, command);
		self.transport.send_line(command)
	}

	/// Gather response lines until the prompt comes back or the budget runs out.
	///
	/// On timeout the target may be halted or may still be running - the
	/// session is marked unsynchronised and only [`Session::interrupt`] may
	/// touch it next.
	fn collect_response(&mut self, command: &str, timeout: Duration) -> Result<String, HarnessError>
	{
		let deadline = Instant::now() + timeout;
		let mut lines: Vec<String> = Vec::new();
		loop {
			let now = Instant::now();
			if now >= deadline {
				self.running = true;
				return Err(HarnessError::Timeout {
					command: command.to_string(),
					budget: timeout,
				});
			}
			match self.transport.recv_line(deadline - now)? {
				Some(line) if is_prompt(&line) => break,
				Some(line) => {
					trace!("[{}] <- {}", self.sequence, line);
					lines.push(line);
				},
				None => {
					self.running = true;
					return Err(HarnessError::Timeout {
						command: command.to_string(),
						budget: timeout,
					});
				},
			}
		}
		self.response = lines.join("\n");
		Ok(self.response.clone())
	}

	/// Switch the hart all subsequent operations address
	pub fn select_hart(&mut self, hart: &Hart) -> Result<(), HarnessError>
	{
		// Debugger thread numbering is 1-based, hart indices 0-based
		let command = format!("thread {}", hart.index + 1);
		let response = self.command(&command)?;
		if response.contains("Unknown thread") || response.contains("No thread") {
			return Err(HarnessError::Protocol {
				command,
				response,
			});
		}
		self.selected_hart = hart.index;
		Ok(())
	}

	/// Point the debugger at the program image for this case
	pub fn file(&mut self, image: &Path) -> Result<(), HarnessError>
	{
		let response = self.command(&format!("file {}", image.display()))?;
		if response.contains("No such file") {
			return Err(HarnessError::Load(response));
		}
		Ok(())
	}

	/// Push the configured image into target memory
	pub fn load(&mut self) -> Result<(), HarnessError>
	{
		let response = self.command_with_timeout("load", LOAD_TIMEOUT)?;
		// A successful load always ends on the transfer statistics line
		if !response.contains("Transfer rate") {
			return Err(HarnessError::Load(response));
		}
		Ok(())
	}

	/// Install a software breakpoint at a symbol or raw address
	pub fn break_at(&mut self, location: &str) -> Result<(), HarnessError>
	{
		let command = format!("b {location}");
		let response = self.command(&command)?;
		if !response.contains("reakpoint") {
			return Err(HarnessError::Protocol {
				command,
				response,
			});
		}
		Ok(())
	}

	/// Install a hardware breakpoint at a symbol or raw address.
	///
	/// Exhaustion of the target's trigger slots is a reported condition for
	/// the test case to act on, not a harness failure.
	pub fn hardware_break_at(&mut self, location: &str) -> Result<(), HarnessError>
	{
		let command = format!("hbreak {location}");
		let response = self.command(&command)?;
		if response.contains(signals::HARDWARE_BREAKPOINT_EXHAUSTED) {
			return Err(HarnessError::ResourceExhausted {
				location: location.to_string(),
			});
		}
		if !response.contains("reakpoint") {
			return Err(HarnessError::Protocol {
				command,
				response,
			});
		}
		Ok(())
	}

	/// Install a data watchpoint on an address or symbol
	pub fn watch_at(&mut self, location: &str, kind: WatchKind) -> Result<(), HarnessError>
	{
		let command = match kind {
			WatchKind::Write => format!("watch {location}"),
			WatchKind::Read => format!("rwatch {location}"),
		};
		let response = self.command(&command)?;
		// "Hardware watchpoint 3: data" / "Hardware read watchpoint 4: data"
		if !response.contains("atchpoint") {
			return Err(HarnessError::Protocol {
				command,
				response,
			});
		}
		Ok(())
	}

	/// Remove every breakpoint and watchpoint this session has installed
	pub fn delete_breakpoints(&mut self) -> Result<(), HarnessError>
	{
		let _ = self.command("delete breakpoints")?;
		Ok(())
	}

	/// Resume the selected hart.
	///
	/// With `wait` the call blocks until the target halts again (breakpoint,
	/// trap or external interrupt) and returns the halt report. Without it
	/// the call returns immediately and the caller must later interrupt the
	/// target, or rely on a breakpoint, to regain control.
	pub fn continue_exec(&mut self, wait: bool, timeout: Option<Duration>) -> Result<String, HarnessError>
	{
		if wait {
			let budget = timeout.unwrap_or(self.default_timeout);
			let response = self.command_with_timeout("c", budget)?;
			// Deferred trigger insertion surfaces the exhaustion phrase at
			// resume time rather than when the breakpoint was requested
			if response.contains(signals::HARDWARE_BREAKPOINT_EXHAUSTED) {
				return Err(HarnessError::ResourceExhausted {
					location: String::from("c"),
				});
			}
			Ok(response)
		} else {
			self.ensure_halted("c")?;
			self.transmit("c")?;
			self.running = true;
			Ok(String::new())
		}
	}

	/// Execute exactly one instruction on the selected hart
	pub fn step_instruction(&mut self) -> Result<String, HarnessError>
	{
		self.command("stepi")
	}

	/// Deliver the out-of-band halt request and collect the halt report.
	///
	/// Interrupting an already-halted target is a no-op, so the primitive is
	/// idempotent. A running target that stays silent past the grace period
	/// is an [`HarnessError::Interrupt`].
	pub fn interrupt(&mut self) -> Result<String, HarnessError>
	{
		if !self.running {
			trace!("interrupt requested while halted, nothing to do");
			return Ok(String::new());
		}
		self.sequence += 1;
		debug!("[{}] hart{} -> ^C", self.sequence, self.selected_hart);
		self.transport.send_interrupt()?;
		match self.collect_response("^C", INTERRUPT_GRACE) {
			Ok(report) => {
				self.running = false;
				Ok(report)
			},
			Err(HarnessError::Timeout { .. }) => Err(HarnessError::Interrupt {
				grace: INTERRUPT_GRACE,
			}),
			Err(error) => Err(error),
		}
	}

	/// Evaluate a debugger expression: a register, a C-like memory
	/// dereference, or arithmetic over symbols
	pub fn evaluate(&mut self, expression: &str, format: ValueFormat) -> Result<Value, HarnessError>
	{
		let command = match format {
			ValueFormat::Hex => format!("p/x {expression}"),
			ValueFormat::Natural | ValueFormat::Raw => format!("p {expression}"),
		};
		let response = self.command(&command)?;

		if let Some(address) = parse_fault_address(&response) {
			return Err(HarnessError::CannotAccess {
				address,
			});
		}
		if response.contains(signals::COULD_NOT_FETCH) || response.contains(signals::NO_SYMBOL) {
			return Err(HarnessError::Evaluation {
				expression: expression.to_string(),
				detail: response,
			});
		}

		let Some(result) = parse_result_text(&response) else {
			return Err(HarnessError::Evaluation {
				expression: expression.to_string(),
				detail: response,
			});
		};
		match format {
			ValueFormat::Raw => Ok(Value::Text(result.to_string())),
			ValueFormat::Natural | ValueFormat::Hex => {
				parse_integer(result).map(Value::Integer).ok_or_else(|| HarnessError::Evaluation {
					expression: expression.to_string(),
					detail: format!("`{result}` is not a scalar"),
				})
			},
		}
	}

	/// Evaluate an expression expected to yield a machine scalar
	pub fn eval_u64(&mut self, expression: &str) -> Result<u64, HarnessError>
	{
		self.evaluate(expression, ValueFormat::Hex)?.as_u64()
	}

	/// Bulk-write a block of target memory through the record encoding
	pub fn write_memory_block(&mut self, block: &MemoryBlock, format: TransferFormat) -> Result<(), HarnessError>
	{
		let TransferFormat::IntelHex = format;
		let mut artifact = NamedTempFile::new()?;
		artifact.write_all(ihex::encode_image(&block.data).as_bytes())?;
		artifact.flush()?;

		// The record addresses are applied relative to the given offset
		let command = format!("restore {} {:#x}", artifact.path().display(), block.base);
		let response = self.command_with_timeout(&command, TRANSFER_TIMEOUT)?;
		if let Some(address) = parse_fault_address(&response) {
			return Err(HarnessError::CannotAccess {
				address,
			});
		}
		if response.contains("Error") || response.contains("No such file") {
			return Err(HarnessError::Transfer(response));
		}
		Ok(())
	}

	/// Bulk-read a block of target memory through the record encoding.
	///
	/// The record checksums on read-back are informational only - content
	/// equality against what was written is the authoritative check, so a
	/// mismatch is logged and decoding continues.
	pub fn read_memory_block(
		&mut self, base: u64, length: u64, format: TransferFormat,
	) -> Result<MemoryBlock, HarnessError>
	{
		let TransferFormat::IntelHex = format;
		let artifact = NamedTempFile::new()?;
		let command = format!(
			"dump ihex memory {} {:#x} {:#x}",
			artifact.path().display(),
			base,
			base + length
		);
		let response = self.command_with_timeout(&command, TRANSFER_TIMEOUT)?;
		if let Some(address) = parse_fault_address(&response) {
			return Err(HarnessError::CannotAccess {
				address,
			});
		}

		let image = std::fs::read_to_string(artifact.path())?;
		let mut data = vec![0u8; length as usize];
		let mut covered = 0u64;
		// Upper linear base carried by type-04 records for targets whose RAM
		// sits above the 16-bit record address space
		let mut upper_base = 0u64;
		for record in ihex::parse_image(&image)? {
			if !record.checksum_valid {
				warn!("read-back record at {:#06x} has a bad checksum, continuing", record.address);
			}
			match record.record_type {
				ihex::RECORD_EOF => break,
				0x04 if record.data.len() == 2 => {
					upper_base = (u64::from(record.data[0]) << 24) | (u64::from(record.data[1]) << 16);
				},
				ihex::RECORD_DATA => {
					let absolute = upper_base + u64::from(record.address);
					let offset = absolute.checked_sub(base).ok_or_else(|| {
						HarnessError::Transfer(format!("record at {absolute:#x} precedes the requested range"))
					})?;
					let end = offset + record.data.len() as u64;
					if end > length {
						return Err(HarnessError::Transfer(format!(
							"record at {absolute:#x} overruns the requested range"
						)));
					}
					data[offset as usize..end as usize].copy_from_slice(&record.data);
					covered += record.data.len() as u64;
				},
				_ => {},
			}
		}
		if covered != length {
			return Err(HarnessError::Transfer(format!(
				"read back {covered} of {length} requested bytes"
			)));
		}
		Ok(MemoryBlock {
			base,
			data,
		})
	}

	/// List the active execution contexts the debugger knows about
	pub fn threads(&mut self) -> Result<Vec<u32>, HarnessError>
	{
		let response = self.command("info threads")?;
		let mut threads = Vec::new();
		for line in response.lines() {
			let line = line.trim_start_matches('*').trim_start();
			if let Some(id) = line.split_whitespace().next().and_then(|token| token.parse::<u32>().ok()) {
				threads.push(id);
			}
		}
		Ok(threads)
	}

	/// The current symbolic location of the selected hart
	pub fn backtrace(&mut self) -> Result<String, HarnessError>
	{
		self.command("where")
	}

	/// Run a debugger monitor command against the remote stub
	pub fn monitor(&mut self, what: &str) -> Result<String, HarnessError>
	{
		self.command(&format!("monitor {what}"))
	}
}

fn is_prompt(line: &str) -> bool
{
	line == PROMPT || line.trim_end() == PROMPT.trim_end()
}

/// Extract the faulting address from the debugger's memory-fault phrasing
fn parse_fault_address(response: &str) -> Option<u64>
{
	let position = response.find(signals::CANNOT_ACCESS)?;
	let rest = &response[position + signals::CANNOT_ACCESS.len()..];
	let token = rest.split_whitespace().next()?;
	let digits = token.trim_start_matches("0x");
	u64::from_str_radix(digits, 16).ok()
}

/// Pull the value text out of a `$N = <value>` result line
fn parse_result_text(response: &str) -> Option<&str>
{
	response
		.lines()
		.rev()
		.find(|line| line.starts_with('$'))
		.and_then(|line| line.split_once(" = "))
		.map(|(_, value)| value.trim())
}

/// Parse a scalar as the debugger prints it: hex, decimal (possibly signed),
/// possibly annotated with a symbol like `0x80000000 <_start>`
fn parse_integer(text: &str) -> Option<u64>
{
	let token = text.split_whitespace().next()?;
	if let Some(digits) = token.strip_prefix("0x") {
		u64::from_str_radix(digits, 16).ok()
	} else if let Ok(value) = token.parse::<u64>() {
		Some(value)
	} else {
		token.parse::<i64>().ok().map(|value| value as u64)
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use crate::transport::ScriptedTransport;

	fn hart() -> Hart
	{
		Hart {
			index: 1,
			xlen: 64,
			extensions: String::from("imac"),
			ram: 0x8000_0000,
			ram_size: 0x4000,
			reset_vectors: vec![0x1000],
			instruction_hardware_breakpoint_count: 2,
			honors_tdata1_hmode: true,
			misa: None,
		}
	}

	#[test]
	fn hardware_breakpoint_exhaustion_is_reported()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&["Cannot insert hardware breakpoint 5."]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		let result = session.hardware_break_at("*rot13 + 0x10");
		assert!(matches!(result, Err(HarnessError::ResourceExhausted { location })
			if location == "*rot13 + 0x10"));
	}

	#[test]
	fn evaluate_parses_hex_scalars()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&["$3 = 0x80000004 <_start+4>"]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		assert_eq!(session.eval_u64("$pc").unwrap(), 0x8000_0004);
	}

	#[test]
	fn evaluate_maps_faulted_accesses()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&["Cannot access memory at address 0xdeadbeef"]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		let result = session.evaluate("*((int*)0xdeadbeef)", ValueFormat::Natural);
		assert!(matches!(result, Err(HarnessError::CannotAccess { address }) if address == 0xdead_beef));
	}

	#[test]
	fn evaluate_maps_absent_registers()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&["Could not fetch register \"pmpcfg0\"; remote failure reply 'E99'"]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		let result = session.evaluate("$pmpcfg0", ValueFormat::Hex);
		assert!(matches!(result, Err(HarnessError::Evaluation { .. })));
	}

	#[test]
	fn commands_are_refused_while_running()
	{
		let mut transport = ScriptedTransport::new();
		transport.on_interrupt(&["Program received signal SIGINT, Interrupt.", "main () at main.c:4"]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		session.continue_exec(false, None).unwrap();
		let refused = session.command("p $pc");
		assert!(matches!(refused, Err(HarnessError::Protocol { .. })));

		// The one legal resynchronisation path
		let report = session.interrupt().unwrap();
		assert!(report.contains("SIGINT"));
	}

	#[test]
	fn interrupt_while_halted_is_a_no_op()
	{
		let transport = ScriptedTransport::new();
		let journal = transport.journal();
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		assert_eq!(session.interrupt().unwrap(), "");
		assert!(journal.lock().unwrap().is_empty());
	}

	#[test]
	fn select_hart_tracks_the_addressed_context()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&["[Switching to thread 2 (Thread 2)]"]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		session.select_hart(&hart()).unwrap();
		assert_eq!(session.selected_hart(), 1);
	}

	#[test]
	fn select_hart_surfaces_rejection()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&["Unknown thread 2."]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		assert!(session.select_hart(&hart()).is_err());
		assert_eq!(session.selected_hart(), 0);
	}

	#[test]
	fn threads_parses_context_listings()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&[
			"  Id   Target Id         Frame",
			"* 1    Thread 1 (hart 0) main () at main.c:10",
			"  2    Thread 2 (hart 1) 0x0000000080000004 in _start ()",
		]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		assert_eq!(session.threads().unwrap(), vec![1, 2]);
	}

	#[test]
	fn watchpoints_install_through_the_right_commands()
	{
		let mut transport = ScriptedTransport::new();
		let journal = transport.journal();
		transport.reply(&["Hardware watchpoint 3: data"]);
		transport.reply(&["Hardware read watchpoint 4: data"]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		session.watch_at("data", WatchKind::Write).unwrap();
		session.watch_at("data", WatchKind::Read).unwrap();
		let journal = journal.lock().unwrap();
		assert_eq!(*journal, ["watch data", "rwatch data"]);
	}

	#[test]
	fn command_sequence_is_monotonic()
	{
		let mut transport = ScriptedTransport::new();
		transport.reply(&["ok"]);
		transport.reply(&["ok"]);
		let mut session = Session::new(Box::new(transport), Duration::from_secs(1));

		let _ = session.command("one").unwrap();
		let _ = session.command("two").unwrap();
		assert_eq!(session.sequence(), 2);
	}
}
