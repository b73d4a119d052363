// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Line transports carrying the debugger's command/response traffic.
//!
//! A transport moves whole lines in each direction and delivers the one
//! out-of-band signal the protocol has: the interrupt request that halts a
//! free-running target. [`ProcessTransport`] fronts a real debugger child
//! process; [`ScriptedTransport`] is an in-memory stand-in that replays
//! canned responses so the harness can test its own contracts without a
//! live target.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::error::HarnessError;

/// The debugger's response terminator. Every response ends with this prompt,
/// which is the framing contract the session layer relies on.
pub const PROMPT: &str = "(gdb) ";

pub trait Transport
{
	/// Send one command line to the debugger
	fn send_line(&mut self, line: &str) -> Result<(), HarnessError>;

	/// Receive the next response line, or `None` if the timeout elapses first
	fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>, HarnessError>;

	/// Deliver the out-of-band halt request for an in-progress continue
	fn send_interrupt(&mut self) -> Result<(), HarnessError>;
}

/// A transport over a spawned external debugger process
pub struct ProcessTransport
{
	child: Child,
	stdin: ChildStdin,
	lines: Receiver<String>,
}

impl ProcessTransport
{
	/// Spawn the debugger named by `command` and wire up its standard streams
	pub fn spawn(command: &[String]) -> Result<Self, HarnessError>
	{
		let (program, args) = command
			.split_first()
			.ok_or_else(|| HarnessError::Descriptor(String::from("empty debugger command")))?;

		let mut child = Command::new(program)
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()?;

		// Stdout and stderr both end up in one channel: the debugger freely
		// mixes diagnostics between the two and response framing relies on
		// the prompt, not on which stream a line arrived on
		let (line_sender, lines) = channel();
		let stdout = child.stdout.take().expect("child stdout was requested piped");
		let stderr = child.stderr.take().expect("child stderr was requested piped");
		let stdin = child.stdin.take().expect("child stdin was requested piped");
		let stdout_sender = line_sender.clone();
		let _ = thread::Builder::new()
			.name(String::from("debugger-stdout"))
			.spawn(move || pump_lines(stdout, stdout_sender));
		let _ = thread::Builder::new()
			.name(String::from("debugger-stderr"))
			.spawn(move || pump_lines(stderr, line_sender));

		Ok(Self {
			child,
			stdin,
			lines,
		})
	}
}

/// Read the stream to exhaustion, handing complete lines to the channel.
///
/// The debugger's prompt is not newline terminated, so a pending partial
/// line that matches it is handed over as a line of its own - without this
/// the response terminator would sit invisible in the buffer forever.
fn pump_lines<SourceT: Read>(mut source: SourceT, sink: Sender<String>)
{
	let mut pending = String::new();
	let mut chunk = [0u8; 4096];
	loop {
		let count = match source.read(&mut chunk) {
			Ok(0) | Err(_) => break,
			Ok(count) => count,
		};
		pending.push_str(&String::from_utf8_lossy(&chunk[..count]));

		while let Some(newline) = pending.find('\n') {
			let line = pending[..newline].trim_end_matches('\r').to_string();
			if sink.send(line).is_err() {
				return;
			}
			pending.drain(..=newline);
		}
		if pending == PROMPT {
			if sink.send(pending.clone()).is_err() {
				return;
			}
			pending.clear();
		}
	}
}

impl Transport for ProcessTransport
{
	fn send_line(&mut self, line: &str) -> Result<(), HarnessError>
	{
		self.stdin.write_all(line.as_bytes())?;
		self.stdin.write_all(b"\n")?;
		Ok(self.stdin.flush()?)
	}

	fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>, HarnessError>
	{
		match self.lines.recv_timeout(timeout) {
			Ok(line) => Ok(Some(line)),
			Err(RecvTimeoutError::Timeout) => Ok(None),
			Err(RecvTimeoutError::Disconnected) => Err(HarnessError::Io(std::io::Error::new(
				std::io::ErrorKind::UnexpectedEof,
				"debugger process closed its output streams",
			))),
		}
	}

	#[cfg(unix)]
	fn send_interrupt(&mut self) -> Result<(), HarnessError>
	{
		trace!("delivering SIGINT to debugger pid {}", self.child.id());
		// SAFETY: kill() with a known-live child pid has no memory effects
		let result = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGINT) };
		if result == 0 {
			Ok(())
		} else {
			Err(HarnessError::Io(std::io::Error::last_os_error()))
		}
	}

	#[cfg(not(unix))]
	fn send_interrupt(&mut self) -> Result<(), HarnessError>
	{
		Err(HarnessError::Io(std::io::Error::new(
			std::io::ErrorKind::Unsupported,
			"out-of-band interrupt delivery is only implemented for Unix hosts",
		)))
	}
}

impl Drop for ProcessTransport
{
	fn drop(&mut self)
	{
		// The debugger gets no say: the session owning this transport is done
		let _ = self.child.kill();
		let _ = self.child.wait();
	}
}

/// One scripted reaction to a command arriving at a [`ScriptedTransport`]
enum Reply
{
	/// Respond with these lines (the prompt is appended automatically)
	Lines(Vec<String>),
	/// Swallow the command, modelling a target that never halts
	Silence,
}

/// An in-memory simulated debugger replaying scripted responses.
///
/// Commands and interrupts are appended to a journal that several transports
/// may share, which is how multi-session issuance ordering gets verified.
pub struct ScriptedTransport
{
	tag: String,
	journal: Arc<Mutex<Vec<String>>>,
	replies: VecDeque<Reply>,
	interrupt_replies: VecDeque<Vec<String>>,
	inbox: VecDeque<String>,
}

impl ScriptedTransport
{
	pub fn new() -> Self
	{
		Self::with_journal(Arc::new(Mutex::new(Vec::new())), "")
	}

	/// Construct a transport appending to a shared journal, with entries
	/// prefixed `tag: ` so tests can tell sessions apart
	pub fn with_journal(journal: Arc<Mutex<Vec<String>>>, tag: &str) -> Self
	{
		Self {
			tag: tag.to_string(),
			journal,
			replies: VecDeque::new(),
			interrupt_replies: VecDeque::new(),
			inbox: VecDeque::new(),
		}
	}

	pub fn journal(&self) -> Arc<Mutex<Vec<String>>>
	{
		Arc::clone(&self.journal)
	}

	/// Script the response to the next as-yet-unscripted command
	pub fn reply(&mut self, lines: &[&str])
	{
		let mut response: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
		response.push(PROMPT.to_string());
		self.replies.push_back(Reply::Lines(response));
	}

	/// Script the next command to go unanswered
	pub fn silence(&mut self)
	{
		self.replies.push_back(Reply::Silence);
	}

	/// Script the halt report produced by the next interrupt request
	pub fn on_interrupt(&mut self, lines: &[&str])
	{
		let mut response: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
		response.push(PROMPT.to_string());
		self.interrupt_replies.push_back(response);
	}

	fn record(&mut self, entry: &str)
	{
		let entry = if self.tag.is_empty() {
			entry.to_string()
		} else {
			format!("{}: {}", self.tag, entry)
		};
		self.journal
			.lock()
			.expect("scripted transport journal poisoned")
			.push(entry);
	}
}

impl Default for ScriptedTransport
{
	fn default() -> Self
	{
		Self::new()
	}
}

impl Transport for ScriptedTransport
{
	fn send_line(&mut self, line: &str) -> Result<(), HarnessError>
	{
		self.record(line);
		match self.replies.pop_front() {
			Some(Reply::Lines(lines)) => self.inbox.extend(lines),
			Some(Reply::Silence) | None => {},
		}
		Ok(())
	}

	fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>, HarnessError>
	{
		match self.inbox.pop_front() {
			Some(line) => Ok(Some(line)),
			None => {
				// Model a quiet wire: the full timeout elapses with no data
				thread::sleep(timeout);
				Ok(None)
			},
		}
	}

	fn send_interrupt(&mut self) -> Result<(), HarnessError>
	{
		self.record("^C");
		if let Some(lines) = self.interrupt_replies.pop_front() {
			self.inbox.extend(lines);
		}
		Ok(())
	}
}
