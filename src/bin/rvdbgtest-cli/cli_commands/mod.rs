// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::time::Duration;

use clap::{Args, Subcommand};
use color_eyre::eyre::{Result, eyre};
use log::info;
use owo_colors::OwoColorize;
use rvdbgtest::cases;
use rvdbgtest::coordinator::Coordinator;
use rvdbgtest::lifecycle::{Outcome, RunConfig, Summary, run_catalog};
use rvdbgtest::target::Target;
use rvdbgtest::toolchain::Toolchain;

use crate::{CliArguments, CompletionArguments};

#[derive(Subcommand)]
pub enum ToplevelCommands
{
	/// Run the selected test cases against the target
	Run(RunArguments),
	/// List the case catalog and its applicability against the target
	List,
	/// Generate completions data for the shell
	Complete(CompletionArguments),
}

#[derive(Args)]
pub struct RunArguments
{
	#[arg(short = 'f', long = "filter")]
	/// Only run cases whose name contains this substring
	filter: Option<String>,
	#[arg(long = "timeout", default_value_t = 10)]
	/// Response budget for blocking debugger calls, in seconds
	timeout: u64,
	#[arg(long = "compiler", default_value = "riscv64-unknown-elf-gcc")]
	/// Cross compiler used to build the case programs
	compiler: String,
}

fn load_target(cli_args: &CliArguments) -> Result<Target>
{
	let path = cli_args
		.target
		.as_deref()
		.ok_or_else(|| eyre!("a target descriptor is required, pass one with --target"))?;
	Ok(Target::from_path(path)?)
}

pub fn run(cli_args: &CliArguments, run_args: &RunArguments) -> Result<()>
{
	let target = load_target(cli_args)?;
	let toolchain = Toolchain::new(&run_args.compiler);
	let config = RunConfig {
		filter: run_args.filter.clone(),
		timeout: Duration::from_secs(run_args.timeout),
		progress: true,
	};

	info!(
		"running against {} ({} hart(s), debugger `{}`)",
		target.name,
		target.harts.len(),
		target.debugger.join(" ")
	);

	let timeout = config.timeout;
	let mut connect =
		|target: &Target| Coordinator::connect_with_timeout(target, timeout);
	let summary = run_catalog(&target, &toolchain, &mut connect, cases::catalog(), &config);

	print_summary(&summary);
	std::process::exit(summary.exit_code());
}

pub fn list(cli_args: &CliArguments) -> Result<()>
{
	let target = load_target(cli_args)?;
	for case in cases::catalog() {
		if case.early_applicable(&target) {
			println!("{}", case.name());
		} else {
			println!("{} {}", case.name(), "(not applicable)".dimmed());
		}
	}
	Ok(())
}

fn print_summary(summary: &Summary)
{
	println!();
	for report in &summary.reports {
		let outcome = match &report.outcome {
			Outcome::Pass => format!("{}", "pass".green()),
			Outcome::Fail(reason) => format!("{} {}", "FAIL".red().bold(), reason),
			Outcome::NotApplicable => format!("{}", "not applicable".dimmed()),
			Outcome::Error(cause) => format!("{} {}", "ERROR".yellow().bold(), cause),
		};
		println!("{:<32} {} [{:.1?}]", report.name, outcome, report.duration);
	}

	let (passed, failed, not_applicable, errored) = summary.tally();
	println!();
	println!("{passed} passed, {failed} failed, {not_applicable} not applicable, {errored} errored");
}
