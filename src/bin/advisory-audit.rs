//! CLI tool for auditing pinned Python dependencies

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use dependency_advisory_audit::ignore::{expires_in_days, DEFAULT_DAYS, DEFAULT_REASON};
use dependency_advisory_audit::{
    audit_with_progress, extract_dependencies_from, read_dependencies, AuditSummary, Configuration, Dependency,
    DependencyFormat, Finding, IgnoreList, ReportFormat, Severity, SourceRegistry,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const WRAP_WIDTH: usize = 79;

#[derive(Parser)]
#[command(name = "advisory-audit")]
#[command(about = "Check pinned Python dependencies against security advisory feeds", long_about = None)]
#[command(version)]
struct Cli {
    /// pyproject.toml holding a [tool.skjold] table
    #[arg(short = 'c', long, global = true, default_value = "./pyproject.toml")]
    configuration_file: PathBuf,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the active configuration
    Config,

    /// List available advisory sources
    Sources,

    /// Check a dependency file for vulnerable packages
    Audit {
        /// Only report findings, always exit successfully
        #[arg(short = 'r', long)]
        report_only: bool,

        /// Output format (cli or json)
        #[arg(short = 'o', long)]
        report_format: Option<ReportFormat>,

        /// Dependency file format when it cannot be inferred from the file name
        #[arg(short = 'f', long)]
        file_format: Option<DependencyFormat>,

        /// Advisory source to use (can be specified multiple times)
        #[arg(short = 's', long = "sources")]
        sources: Vec<String>,

        /// Dependency file, or '-' for stdin
        #[arg(default_value = "./requirements.txt")]
        file: PathBuf,
    },

    /// Accept a finding for a number of days
    Ignore {
        /// Advisory identifier, e.g. CVE-2019-11324
        identifier: String,

        /// Affected package name
        package: String,

        #[arg(long, default_value = DEFAULT_REASON)]
        reason: String,

        #[arg(long, default_value_t = DEFAULT_DAYS)]
        days: i64,
    },
}

fn main() {
    let cli = Cli::parse();

    let configuration = match Configuration::load(&cli.configuration_file) {
        Ok(configuration) => configuration,
        Err(e) => {
            eprintln!("{} Failed to load configuration: {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    init_logging(cli.verbose || configuration.verbose);
    info!("Using configuration from {}", cli.configuration_file.display());

    let result = match cli.command {
        Commands::Config => {
            print_configuration(&configuration);
            Ok(true)
        }
        Commands::Sources => {
            print_sources(&configuration);
            Ok(true)
        }
        Commands::Audit {
            report_only,
            report_format,
            file_format,
            sources,
            file,
        } => {
            let mut configuration = configuration;
            if report_only {
                configuration.report_only = true;
            }
            if let Some(format) = report_format {
                configuration.report_format = format;
            }
            if !sources.is_empty() {
                configuration.sources = dedup(sources);
            }
            run_audit(&configuration, &file, file_format)
        }
        Commands::Ignore {
            identifier,
            package,
            reason,
            days,
        } => add_ignore(&configuration, &identifier, &package, &reason, days).map(|_| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Keep the first occurrence of each name
fn dedup(names: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

fn print_configuration(configuration: &Configuration) {
    for (key, value) in configuration.entries() {
        println!("{}: {}", key.bold(), value);
    }
}

fn print_sources(configuration: &Configuration) {
    let registry = SourceRegistry::with_defaults();
    for name in registry.names() {
        if configuration.sources.iter().any(|configured| configured == name) {
            println!("{} {}", name, "(configured)".green());
        } else {
            println!("{}", name);
        }
    }
}

fn read_input(file: &Path, format: Option<DependencyFormat>) -> anyhow::Result<Vec<Dependency>> {
    if file == Path::new("-") {
        let format = format.context("Reading from stdin requires --file-format")?;
        let mut content = String::new();
        io::stdin().read_to_string(&mut content)?;
        return Ok(read_dependencies(
            BufReader::new(content.as_bytes()),
            format,
            Path::new("<stdin>"),
        )?);
    }

    extract_dependencies_from(file, format).with_context(|| format!("Failed to read {}", file.display()))
}

/// Returns false when vulnerable packages were found and the run should fail
fn run_audit(configuration: &Configuration, file: &Path, format: Option<DependencyFormat>) -> anyhow::Result<bool> {
    if configuration.sources.is_empty() {
        bail!("Please specify or configure at least one advisory source.");
    }

    let registry = SourceRegistry::with_defaults();
    configuration.validate(&registry)?;

    let dependencies = read_input(file, format)?;
    let ignore = IgnoreList::load(&configuration.ignore_file)?;
    let mut sources = registry.create_all(&configuration.sources, &configuration.source_settings())?;
    debug!("Sources: {:?}", configuration.sources);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    let findings = audit_with_progress(&mut sources, &dependencies, &ignore, |source, dependency| {
        spinner.set_message(format!("Checking {}=={} via {}", dependency.name(), dependency.version(), source));
    });
    spinner.finish_and_clear();
    let findings = findings?;

    match configuration.report_format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&findings)?),
        ReportFormat::Cli => print_findings(&findings),
    }

    let summary = AuditSummary::from_findings(&findings);
    print_summary(&summary);

    Ok(configuration.report_only || !summary.is_vulnerable())
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::None => Color::White,
        Severity::Low | Severity::Medium | Severity::Moderate => Color::Yellow,
        Severity::High | Severity::Critical | Severity::Unknown => Color::Red,
    }
}

fn print_findings(findings: &[Finding]) {
    for finding in findings {
        let color = severity_color(finding.severity);
        let location = finding
            .file
            .as_ref()
            .map(|file| match file.line {
                Some(line) => format!(" found in {}:{}", file.path.display(), line),
                None => format!(" found in {}", file.path.display()),
            })
            .unwrap_or_default();

        println!(
            "{} ({}) via {} as {}{}",
            format!("{}=={}", finding.name, finding.version).color(color).bold(),
            finding.versions,
            finding.source.bold(),
            finding.identifier.color(color).bold(),
            location
        );

        if finding.ignored.ignored {
            let expires = finding.ignored.expires.as_deref().unwrap_or_default();
            println!("{}", format!("Ignored until {}.", expires).yellow());
            if let Some(reason) = &finding.ignored.reason {
                println!("{}", reason);
            }
        }

        println!();
        for line in wrap(&finding.summary, WRAP_WIDTH) {
            println!("{}", line);
        }
        println!();
        println!("{}", finding.url.blue());
        for reference in finding.references.iter().filter(|r| **r != finding.url) {
            println!("{}", reference.blue());
        }
        println!("-- ");
    }
}

fn print_summary(summary: &AuditSummary) {
    if !summary.ignored_findings.is_empty() {
        eprintln!(
            "{}",
            format!("Ignored {} finding(s)!", summary.ignored_findings.len()).yellow()
        );
    }

    if summary.is_vulnerable() {
        eprintln!(
            "{}",
            format!("Found {} vulnerable package(s)!", summary.vulnerable_packages.len())
                .red()
                .bold()
        );
    } else {
        eprintln!("{}", "No vulnerable packages found!".green());
    }
}

fn add_ignore(configuration: &Configuration, identifier: &str, package: &str, reason: &str, days: i64) -> anyhow::Result<()> {
    let mut ignore = IgnoreList::load(&configuration.ignore_file)
        .with_context(|| format!("Failed to read {}", configuration.ignore_file.display()))?;
    let expires = expires_in_days(days)?;
    ignore.add(identifier, package, reason, expires);
    ignore.save()?;

    println!(
        "Ignoring {} in {} until {} ({})",
        identifier.bold(),
        package.bold(),
        expires.format(dependency_advisory_audit::ignore::EXPIRES_FORMAT),
        ignore.path().display()
    );
    Ok(())
}

/// Greedy word wrap; paragraphs separated by blank lines are kept apart
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for (index, paragraph) in text.split("\n\n").enumerate() {
        if index > 0 {
            lines.push(String::new());
        }
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
            } else if current.len() + 1 + word.len() > width {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
            } else {
                current.push(' ');
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}
