// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Harness self-tests: every contract that can be exercised against the
//! scripted transport, without a live target or toolchain.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use rvdbgtest::cases;
use rvdbgtest::coordinator::Coordinator;
use rvdbgtest::error::HarnessError;
use rvdbgtest::lifecycle::{
	Outcome, RunConfig, TestCase, TestContext, TestStatus, run_catalog,
};
use rvdbgtest::session::Session;
use rvdbgtest::target::{Hart, Target};
use rvdbgtest::toolchain::Toolchain;
use rvdbgtest::transport::ScriptedTransport;

fn hart(index: u32) -> Hart
{
	Hart {
		index,
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

fn target(hart_count: u32, one_session_per_hart: bool) -> Target
{
	Target {
		name: String::from("scripted"),
		debugger: vec![String::from("unused")],
		one_session_per_hart,
		supports_clint_mtime: false,
		harts: (0..hart_count).map(hart).collect(),
	}
}

fn session(transport: ScriptedTransport) -> Session
{
	Session::new(Box::new(transport), Duration::from_secs(1))
}

fn quiet() -> RunConfig
{
	RunConfig {
		filter: None,
		timeout: Duration::from_secs(1),
		progress: false,
	}
}

#[test]
fn coordinator_issues_every_continue_before_any_interrupt() -> Result<()>
{
	const HARTS: u32 = 3;

	let target = target(HARTS, true);
	let journal = Arc::new(Mutex::new(Vec::new()));
	let mut sessions = Vec::new();
	for index in 0..HARTS {
		let mut transport = ScriptedTransport::with_journal(Arc::clone(&journal), &format!("hart{index}"));
		transport.on_interrupt(&[
			"Program received signal SIGINT, Interrupt.",
			"main () at multicore.S:20",
		]);
		sessions.push(session(transport));
	}
	let mut coordinator =
		Coordinator::new(&target, sessions)?.with_settle(Duration::from_millis(10));

	let launch_reports = coordinator.run_all(false, None)?;
	assert_eq!(launch_reports.len(), 0);
	let halt_reports = coordinator.halt_all()?;

	// Exactly one halt report per hart
	assert_eq!(halt_reports.len(), HARTS as usize);
	for report in &halt_reports {
		assert!(report.contains("SIGINT"));
	}

	// Strict ordering on the wire: all continues, then all interrupts
	let journal = journal.lock().unwrap();
	let continues: Vec<usize> = journal
		.iter()
		.enumerate()
		.filter(|(_, entry)| entry.ends_with(": c"))
		.map(|(position, _)| position)
		.collect();
	let interrupts: Vec<usize> = journal
		.iter()
		.enumerate()
		.filter(|(_, entry)| entry.ends_with(": ^C"))
		.map(|(position, _)| position)
		.collect();
	assert_eq!(continues.len(), HARTS as usize);
	assert_eq!(interrupts.len(), HARTS as usize);
	let last_continue = continues.last().unwrap();
	let first_interrupt = interrupts.first().unwrap();
	assert!(
		last_continue < first_interrupt,
		"a continue was issued after an interrupt: {journal:?}"
	);
	Ok(())
}

struct GatedCase;

impl TestCase for GatedCase
{
	fn name(&self) -> &'static str
	{
		"GatedCase"
	}

	fn early_applicable(&self, target: &Target) -> bool
	{
		target.harts.len() > 1
	}

	fn test(&mut self, ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		let _ = ctx.session().command("should never run")?;
		Ok(TestStatus::Done)
	}
}

#[test]
fn inapplicable_case_never_touches_the_target()
{
	let target = target(1, false);
	let mut connections = 0usize;
	let mut connect = |target: &Target| {
		connections += 1;
		Coordinator::new(target, vec![session(ScriptedTransport::new())])
	};

	let summary = run_catalog(
		&target,
		&Toolchain::default(),
		&mut connect,
		vec![Box::new(GatedCase)],
		&quiet(),
	);

	assert_eq!(summary.reports.len(), 1);
	assert_eq!(summary.reports[0].outcome, Outcome::NotApplicable);
	// Zero side effects: not even a connection was established
	assert_eq!(connections, 0);
	assert_eq!(summary.exit_code(), 0);
}

struct OutcomeProbe
{
	verdict: fn() -> Result<TestStatus, HarnessError>,
}

impl TestCase for OutcomeProbe
{
	fn name(&self) -> &'static str
	{
		"OutcomeProbe"
	}

	fn test(&mut self, _ctx: &mut TestContext) -> Result<TestStatus, HarnessError>
	{
		(self.verdict)()
	}
}

fn run_probe(verdict: fn() -> Result<TestStatus, HarnessError>) -> Outcome
{
	let target = target(1, false);
	let mut connect =
		|target: &Target| Coordinator::new(target, vec![session(ScriptedTransport::new())]);
	let summary = run_catalog(
		&target,
		&Toolchain::default(),
		&mut connect,
		vec![Box::new(OutcomeProbe {
			verdict,
		})],
		&quiet(),
	);
	summary.reports.into_iter().next().unwrap().outcome
}

#[test]
fn outcomes_classify_by_error_kind()
{
	assert_eq!(run_probe(|| Ok(TestStatus::Done)), Outcome::Pass);
	assert_eq!(run_probe(|| Ok(TestStatus::NotApplicable)), Outcome::NotApplicable);
	assert_eq!(
		run_probe(|| Err(HarnessError::Assertion(String::from("observed 1, expected 2")))),
		Outcome::Fail(String::from("observed 1, expected 2"))
	);
	let errored = run_probe(|| {
		Err(HarnessError::Protocol {
			command: String::from("c"),
			response: String::from("gibberish"),
		})
	});
	assert!(matches!(errored, Outcome::Error(_)));
}

#[test]
fn run_health_reflects_in_exit_codes()
{
	assert_eq!(run_probe(|| Ok(TestStatus::Done)), Outcome::Pass);

	let target = target(1, false);
	let mut connect =
		|target: &Target| Coordinator::new(target, vec![session(ScriptedTransport::new())]);
	let summary = run_catalog(
		&target,
		&Toolchain::default(),
		&mut connect,
		vec![Box::new(OutcomeProbe {
			verdict: || Err(HarnessError::Assertion(String::from("nope"))),
		})],
		&quiet(),
	);
	assert_eq!(summary.exit_code(), 1);
}

#[test]
fn blocking_continue_times_out_within_budget()
{
	let mut transport = ScriptedTransport::new();
	transport.silence();
	let mut session = session(transport);

	let budget = Duration::from_secs(1);
	let started = Instant::now();
	let result = session.continue_exec(true, Some(budget));
	let elapsed = started.elapsed();

	assert!(matches!(result, Err(HarnessError::Timeout { .. })));
	assert!(elapsed >= budget, "returned after {elapsed:?}, before the budget");
	assert!(
		elapsed < budget + Duration::from_millis(500),
		"took {elapsed:?}, well past the budget"
	);
}

#[test]
fn timed_out_session_must_be_resynchronised_by_interrupt()
{
	let mut transport = ScriptedTransport::new();
	transport.silence();
	transport.on_interrupt(&["Program received signal SIGINT, Interrupt.", "main () at debug.c:44"]);
	transport.reply(&["$1 = 0x8000000c"]);
	let mut session = session(transport);

	let timed_out = session.continue_exec(true, Some(Duration::from_millis(50)));
	assert!(matches!(timed_out, Err(HarnessError::Timeout { .. })));

	// The connection state is indeterminate: ordinary commands are refused
	let refused = session.command("p $pc");
	assert!(matches!(refused, Err(HarnessError::Protocol { .. })));

	// Interrupt resynchronises, after which traffic flows again
	let report = session.interrupt().unwrap();
	assert!(report.contains("SIGINT"));
	assert_eq!(session.eval_u64("$pc").unwrap(), 0x8000_000c);
}

#[test]
fn rot13_breakpoint_hits_twice_then_runs_to_exit() -> Result<()>
{
	let mut transport = ScriptedTransport::new();
	transport.reply(&["Breakpoint 1 at 0x80000040: file debug.c, line 54."]);
	transport.reply(&["Breakpoint 2 at 0x80000010: file debug.c, line 17."]);
	transport.reply(&[
		"Continuing.",
		"",
		"Breakpoint 2, rot13 (buf=0x80001000 \"The quick brown fox...\") at debug.c:17",
	]);
	transport.reply(&[
		"Continuing.",
		"",
		"Breakpoint 2, rot13 (buf=0x80001000 \"Gur dhvpx oebja sbk...\") at debug.c:17",
	]);
	transport.reply(&["Continuing.", "", "Breakpoint 1, _exit (code=1696529223) at debug.c:54"]);
	let mut session = session(transport);

	session.break_at("_exit")?;
	session.break_at("rot13")?;
	for _ in 0..2 {
		let report = session.continue_exec(true, None)?;
		assert!(report.contains("Breakpoint"));
		assert!(report.contains("rot13"));
	}
	let report = session.continue_exec(true, None)?;
	assert!(report.contains("Breakpoint"));
	assert!(report.contains("_exit"));
	Ok(())
}

#[test]
fn memory_width_case_passes_against_faithful_target()
{
	// The scripted target echoes back exactly what the case wrote: 16-, 32-
	// and 64-bit values at both ends of RAM, never aliasing
	let mut transport = ScriptedTransport::new();
	let patterns: &[(u64, &str, u64, u64)] = &[
		(2, "short", 0xaaaa, 0x5678),
		(4, "int", 0x5555_aaaa, 0x1234_5678),
		(8, "long long", 0x0867_5309_5555_aaaa, 0xdead_beef_1234_5678),
	];
	for (size, _, a, b) in patterns {
		transport.reply(&[&format!("$1 = {size}")]);
		transport.reply(&[&format!("$2 = {a:#x}")]);
		transport.reply(&[&format!("$3 = {b:#x}")]);
		transport.reply(&[&format!("$4 = {a:#x}")]);
		transport.reply(&[&format!("$5 = {b:#x}")]);
	}

	let target = target(1, false);
	let mut coordinator = Some(Coordinator::new(&target, vec![session(transport)]).unwrap());
	let mut connect = move |_: &Target| -> Result<Coordinator, HarnessError> {
		Ok(coordinator.take().expect("single connection"))
	};

	let case = cases::catalog()
		.into_iter()
		.find(|case| case.name() == "MemoryAccessWidths")
		.expect("catalog misses the memory width case");
	let summary = run_catalog(&target, &Toolchain::default(), &mut connect, vec![case], &quiet());

	assert_eq!(summary.reports[0].outcome, Outcome::Pass);
}

#[test]
fn shared_session_coordinator_collects_per_hart_reports() -> Result<()>
{
	let target = target(2, false);
	let mut transport = ScriptedTransport::new();
	transport.on_interrupt(&["Program received signal SIGINT, Interrupt.", "main () at multicore.S:20"]);
	// Per-hart collection: select + backtrace, twice
	transport.reply(&["[Switching to thread 1 (Thread 1)]"]);
	transport.reply(&["#0  main () at multicore.S:20"]);
	transport.reply(&["[Switching to thread 2 (Thread 2)]"]);
	transport.reply(&["#0  main () at multicore.S:22"]);

	let mut coordinator =
		Coordinator::new(&target, vec![session(transport)])?.with_settle(Duration::from_millis(10));
	let _ = coordinator.run_all(false, None)?;
	let reports = coordinator.halt_all()?;

	assert_eq!(reports.len(), 2);
	assert!(reports[0].contains("multicore.S:20"));
	assert!(reports[1].contains("multicore.S:22"));
	Ok(())
}
