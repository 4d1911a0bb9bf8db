//! carver - Scan firmware images and recursively carve out embedded files
//!
//! The command line is assembled from the options every registered module
//! declares, so new modules get their flags without touching this file.

use anyhow::{bail, Context, Result};
use carver_core::module::{ModuleOption, OptionTable, ValueKind};
use carver_core::{Finding, ModuleGraph, ModuleReport, OptionValue, ParsedArgs, Registry};
use clap::{Arg, ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::path::Path;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

/// Scan firmware images and recursively carve out embedded files
#[derive(Parser, Debug)]
#[command(name = "carver")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Builds the full command: the static flags plus every module option
fn command(registry: &Registry, table: &OptionTable) -> clap::Command {
    table.iter().fold(Cli::command(), |command, entry| {
        let heading = registry
            .get(entry.module)
            .map(|spec| spec.title)
            .unwrap_or(entry.module);
        command.arg(module_arg(&entry.option).help_heading(heading))
    })
}

fn module_arg(option: &ModuleOption) -> Arg {
    let mut arg = Arg::new(option.long).help(option.help);

    if option.positional {
        return arg
            .value_name("FILE")
            .num_args(0..)
            .action(ArgAction::Append);
    }

    arg = arg.long(option.long);
    if let Some(short) = option.short {
        arg = arg.short(short);
    }

    match option.kind {
        ValueKind::Flag => arg.action(ArgAction::SetTrue),
        ValueKind::Int => arg
            .value_name("N")
            .allow_negative_numbers(true)
            .action(ArgAction::Set),
        ValueKind::Str => arg.action(ArgAction::Set),
        ValueKind::List => arg.action(ArgAction::Append),
    }
}

/// Converts clap's matches into the values the module graph consumes
fn collect_args(table: &OptionTable, matches: &ArgMatches) -> Result<ParsedArgs> {
    let mut args = ParsedArgs::new();

    for entry in table.iter() {
        let option = &entry.option;
        let value = match option.kind {
            ValueKind::Flag => matches
                .get_flag(option.long)
                .then_some(OptionValue::Bool(true)),
            ValueKind::List => matches.get_many::<String>(option.long).map(|values| {
                OptionValue::List(values.cloned().collect())
            }),
            kind => match matches.get_one::<String>(option.long) {
                Some(raw) => Some(
                    OptionValue::parse(kind, raw)
                        .with_context(|| format!("Invalid value for --{}", option.long))?,
                ),
                None => None,
            },
        };

        if let Some(value) = value {
            debug!("--{} = {:?}", option.long, value);
            args.insert(option.long.to_string(), value);
        }
    }

    Ok(args)
}

fn main() -> Result<()> {
    let registry = Registry::builtin();
    let table = OptionTable::aggregate(&registry).context("Conflicting module options")?;
    let matches = command(&registry, &table).get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = collect_args(&table, &matches)?;
    if !args.contains_key("files") {
        bail!("No target files specified");
    }

    let mut graph = ModuleGraph::new(registry, args).context("Invalid arguments")?;
    let reports = graph.execute().context("Scan aborted")?;

    if !reports.iter().any(|report| report.primary) {
        bail!("No scan was performed; enable a scan with --signature or --raw");
    }

    for report in &reports {
        print_report(report);
    }

    Ok(())
}

/// Prints a module's displayable findings as a table, grouped by file
fn print_report(report: &ModuleReport) {
    for failure in &report.failures {
        error!("{}", failure);
    }

    let shown: Vec<&Finding> = report.findings.iter().filter(|f| f.display).collect();
    if shown.is_empty() {
        if report.primary {
            info!("{}: no results", report.title);
        }
        return;
    }

    let mut current: Option<&Path> = None;
    for finding in shown {
        let file = finding.file.as_ref().map(|file| file.path.as_path());
        if file != current {
            if let Some(path) = file {
                println!();
                println!("Scan:        {}", report.title);
                println!("Target File: {}", path.display());
            }
            println!();
            println!("{:<14}{:<18}DESCRIPTION", "DECIMAL", "HEXADECIMAL");
            println!("{}", "-".repeat(80));
            current = file;
        }
        println!("{}", format_row(finding));
    }
    println!();
}

fn format_row(finding: &Finding) -> String {
    format!(
        "{:<14}{:<18}{}",
        finding.offset,
        format!("{:#X}", finding.offset),
        finding.description
    )
}
