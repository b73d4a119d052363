// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

mod cli_commands;

use std::io::stdout;
use std::path::PathBuf;

use clap::builder::styling::Styles;
use clap::{ArgAction, Args, CommandFactory, Parser, crate_description, crate_version};
use clap_complete::{Shell, generate};
use color_eyre::eyre::Result;

use crate::cli_commands::ToplevelCommands;

#[derive(Parser)]
#[command(
	version,
	about = format!("{} v{}", crate_description!(), crate_version!()),
	styles(style()),
	disable_colored_help(false),
	arg_required_else_help(true)
)]
struct CliArguments
{
	#[arg(global = true, short = 't', long = "target")]
	/// Path to the JSON descriptor of the target to test
	target: Option<PathBuf>,
	#[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
	/// Raise log verbosity (repeat for protocol-level traffic)
	verbose: u8,

	#[command(subcommand)]
	pub subcommand: ToplevelCommands,
}

#[derive(Args)]
struct CompletionArguments
{
	shell: Shell,
}

/// Clap v3 style (approximate)
/// See https://stackoverflow.com/a/75343828
fn style() -> clap::builder::Styles
{
	Styles::styled()
		.usage(
			anstyle::Style::new()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)))
				.bold(),
		)
		.header(
			anstyle::Style::new()
				.bold()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
		)
		.literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
}

fn main() -> Result<()>
{
	color_eyre::install()?;

	let cli_args = CliArguments::parse();
	let level = match cli_args.verbose {
		0 => log::LevelFilter::Info,
		1 => log::LevelFilter::Debug,
		_ => log::LevelFilter::Trace,
	};
	env_logger::Builder::new()
		.filter_level(level)
		.parse_default_env()
		.init();

	match &cli_args.subcommand {
		ToplevelCommands::Run(run_args) => cli_commands::run(&cli_args, run_args),
		ToplevelCommands::List => cli_commands::list(&cli_args),
		ToplevelCommands::Complete(comp_args) => {
			let mut cmd = CliArguments::command();
			generate(comp_args.shell, &mut cmd, "rvdbgtest-cli", &mut stdout());
			Ok(())
		},
	}
}
