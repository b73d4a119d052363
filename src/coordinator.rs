// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Hart-scoped run control over one-or-many debugger sessions.
//!
//! Targets come in two topologies: every hart addressable behind a single
//! debugger connection (thread selection before each operation), or one
//! dedicated debugger process per hart. The [`Coordinator`] hides the
//! difference behind one interface and, crucially, serialises cross-hart
//! control into a defined order: debugger back ends serialise control
//! requests per connection, and interleaving per-hart continue/interrupt
//! pairs can deadlock or deliver duplicate interrupts.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::HarnessError;
use crate::session::{DEFAULT_TIMEOUT, Session};
use crate::target::{Hart, Target};
use crate::transport::ProcessTransport;

/// How long running harts get to make measurable progress before the
/// coordinator pulls them back with interrupts
pub const SETTLE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology
{
	/// One debugger connection, harts addressed by thread selection
	SharedSession,
	/// A dedicated debugger process for every hart
	SessionPerHart,
}

pub struct Coordinator
{
	topology: Topology,
	sessions: Vec<Session>,
	harts: Vec<Hart>,
	settle: Duration,
}

impl Coordinator
{
	/// Bind already-established sessions to a target's harts.
	///
	/// The session count must fit the topology: one for a shared connection,
	/// one per hart otherwise.
	pub fn new(target: &Target, sessions: Vec<Session>) -> Result<Self, HarnessError>
	{
		let topology = if target.one_session_per_hart {
			Topology::SessionPerHart
		} else {
			Topology::SharedSession
		};
		let expected = match topology {
			Topology::SharedSession => 1,
			Topology::SessionPerHart => target.harts.len(),
		};
		if sessions.len() != expected {
			return Err(HarnessError::Descriptor(format!(
				"target {} needs {} session(s) for its topology, got {}",
				target.name,
				expected,
				sessions.len()
			)));
		}
		Ok(Self {
			topology,
			sessions,
			harts: target.harts.clone(),
			settle: SETTLE_INTERVAL,
		})
	}

	/// Spawn the debugger process(es) the target's topology calls for and
	/// wrap them into a ready coordinator
	pub fn connect(target: &Target) -> Result<Self, HarnessError>
	{
		Self::connect_with_timeout(target, DEFAULT_TIMEOUT)
	}

	/// As [`Coordinator::connect`], with the per-blocking-call budget the
	/// spawned sessions will use
	pub fn connect_with_timeout(target: &Target, timeout: Duration) -> Result<Self, HarnessError>
	{
		let count = if target.one_session_per_hart {
			target.harts.len()
		} else {
			1
		};
		let mut sessions = Vec::with_capacity(count);
		for _ in 0..count {
			let transport = ProcessTransport::spawn(&target.debugger)?;
			sessions.push(Session::new(Box::new(transport), timeout));
		}
		Self::new(target, sessions)
	}

	/// Shorten the settle interval; the coordinator's own tests run against
	/// scripted targets where two real seconds buy nothing
	pub fn with_settle(mut self, settle: Duration) -> Self
	{
		self.settle = settle;
		self
	}

	pub fn topology(&self) -> Topology
	{
		self.topology
	}

	pub fn harts(&self) -> &[Hart]
	{
		&self.harts
	}

	/// The session single-hart cases drive directly
	pub fn primary_session(&mut self) -> &mut Session
	{
		&mut self.sessions[0]
	}

	/// The session addressing the given hart, with thread selection already
	/// performed in the shared topology
	pub fn session_for(&mut self, hart: &Hart) -> Result<&mut Session, HarnessError>
	{
		let position = self
			.harts
			.iter()
			.position(|candidate| candidate.index == hart.index)
			.ok_or_else(|| HarnessError::Descriptor(format!("hart {} is not part of this target", hart.index)))?;
		match self.topology {
			Topology::SharedSession => {
				let session = &mut self.sessions[0];
				session.select_hart(hart)?;
				Ok(session)
			},
			Topology::SessionPerHart => Ok(&mut self.sessions[position]),
		}
	}

	/// Run an operation against every session this coordinator holds, without
	/// touching hart selection
	pub fn for_each_session<OperationT>(&mut self, mut operation: OperationT) -> Result<(), HarnessError>
	where
		OperationT: FnMut(&mut Session) -> Result<(), HarnessError>,
	{
		for session in &mut self.sessions {
			operation(session)?;
		}
		Ok(())
	}

	/// Run an operation against every hart, in hart order
	pub fn for_each_hart<OperationT>(&mut self, mut operation: OperationT) -> Result<(), HarnessError>
	where
		OperationT: FnMut(&mut Session, &Hart) -> Result<(), HarnessError>,
	{
		let harts = self.harts.clone();
		for hart in &harts {
			let session = self.session_for(hart)?;
			operation(session, hart)?;
		}
		Ok(())
	}

	/// Resume every hart, preserving program order of issuance.
	///
	/// With `wait` the call returns the halt reports (a single all-stop
	/// report in the shared topology); without it the harts are left running
	/// and the reports come from a later [`Coordinator::halt_all`].
	pub fn run_all(&mut self, wait: bool, timeout: Option<Duration>) -> Result<Vec<String>, HarnessError>
	{
		let mut reports = Vec::new();
		match self.topology {
			Topology::SharedSession => {
				// One resume drives every hart in all-stop fashion
				let report = self.sessions[0].continue_exec(wait, timeout)?;
				if wait {
					reports.push(report);
				}
			},
			Topology::SessionPerHart => {
				for session in &mut self.sessions {
					let report = session.continue_exec(wait, timeout)?;
					if wait {
						reports.push(report);
					}
				}
			},
		}
		Ok(reports)
	}

	/// Halt every running hart and collect one halt report per hart.
	///
	/// The settle sleep is a single bounded wait sized to let the targets
	/// make progress; only after it do any interrupts go out, so every
	/// continue issued by [`Coordinator::run_all`] strictly precedes every
	/// interrupt on the wire.
	pub fn halt_all(&mut self) -> Result<Vec<String>, HarnessError>
	{
		thread::sleep(self.settle);
		match self.topology {
			Topology::SharedSession => {
				let report = self.sessions[0].interrupt()?;
				debug!("all-stop interrupt reported: {report}");
				// Per-hart reports come from walking the contexts once halted
				let harts = self.harts.clone();
				let mut reports = Vec::with_capacity(harts.len());
				for hart in &harts {
					let session = &mut self.sessions[0];
					session.select_hart(hart)?;
					reports.push(session.backtrace()?);
				}
				Ok(reports)
			},
			Topology::SessionPerHart => {
				let mut reports = Vec::with_capacity(self.sessions.len());
				for session in &mut self.sessions {
					reports.push(session.interrupt()?);
				}
				Ok(reports)
			},
		}
	}
}
