//! machguard CLI - inspect Mach-O images and verify the runtime environment.
//!
//! ## Usage
//!
//! ```bash
//! # Run every probe and print the report (exit 1 if compromised)
//! machguard scan --signatures SecurityPresets.plist --bundle /Applications/App.app
//!
//! # Dump the entitlements of an executable
//! machguard entitlements /Applications/App.app/Contents/MacOS/App
//!
//! # Show the code-signature layout and the __TEXT,__text digest
//! machguard signature App
//! machguard digest App
//!
//! # Scan and write the report as a property list
//! machguard export report.plist
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use machguard_core::macho::{Arch, ImageHeader, MachONavigator};
use machguard_core::report::{ReportEntry, Severity};
use machguard_core::security::{digest_sha256, file_integrity::read_text_section};
use machguard_core::{entitlements, export, Engine, EngineConfig, SecurityReport};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Mach-O integrity and runtime environment verification.
#[derive(Parser)]
#[command(name = "machguard")]
#[command(version = VERSION)]
#[command(about = "Mach-O integrity and runtime environment verification")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: Format,

    /// Detection signature database (plist)
    #[arg(long, global = true)]
    signatures: Option<PathBuf>,

    /// Application bundle to verify
    #[arg(long, global = true)]
    bundle: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every probe and print the report
    Scan,

    /// Print the entitlements embedded in an executable
    Entitlements {
        /// Path to a thin Mach-O executable
        binary: PathBuf,
    },

    /// Print the code-signature layout of an executable
    Signature {
        /// Path to a thin Mach-O executable
        binary: PathBuf,
    },

    /// Print the SHA-256 of __TEXT,__text
    Digest {
        /// Path to a thin Mach-O executable
        binary: PathBuf,
    },

    /// Run every probe and write the report as a property list
    Export {
        /// Output path
        output: PathBuf,

        /// Module name recorded in the document
        #[arg(long, default_value = "Security")]
        name: String,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.format == Format::Json;
    match cli.command {
        Commands::Scan => {
            let report = scan(cli.signatures, cli.bundle);
            if json {
                println!("{}", export::to_json(&report)?);
            } else {
                print_report(&report);
            }
            if report.is_compromised() {
                return Ok(ExitCode::from(1));
            }
        },

        Commands::Entitlements { binary } => {
            let found = entitlements::read_from_path(&binary)
                .with_context(|| format!("reading entitlements of {}", binary.display()))?;
            if json {
                let map: serde_json::Map<_, _> = found
                    .as_map()
                    .iter()
                    .map(|(key, value)| (key.clone(), serde_json::Value::String(render(value))))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                println!("Entitlements of {}:", binary.display());
                for (key, value) in found.as_map() {
                    println!("  {:<50} {}", key, render(value));
                }
                println!("\nTotal: {} keys", found.len());
            }
        },

        Commands::Signature { binary } => print_signature(&binary, json)?,

        Commands::Digest { binary } => {
            let bytes = read_text_section(&binary)
                .with_context(|| format!("parsing {}", binary.display()))?
                .with_context(|| format!("{} has no __TEXT,__text section", binary.display()))?;
            let digest = digest_sha256(&bytes);
            if json {
                let output = serde_json::json!({
                    "path": binary.display().to_string(),
                    "size": bytes.len(),
                    "sha256": digest,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", digest);
            }
        },

        Commands::Export { output, name } => {
            let report = scan(cli.signatures, cli.bundle);
            export::write(&output, &report, &name)
                .with_context(|| format!("writing {}", output.display()))?;
            eprintln!("Report written to {}", output.display());
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn scan(signatures: Option<PathBuf>, bundle: Option<PathBuf>) -> SecurityReport {
    let mut config = EngineConfig::from_env();
    if signatures.is_some() {
        config.signatures_path = signatures;
    }
    if bundle.is_some() {
        config.bundle_root = bundle;
    }
    let engine = Engine::new(&config);
    engine.run_all();
    engine.current_report().as_ref().clone()
}

fn marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Ok => "[ OK ]",
        Severity::Critical => "[FAIL]",
        Severity::Neutral => "[ -- ]",
    }
}

fn print_entry(entry: &ReportEntry, depth: usize) {
    let indent = "    ".repeat(depth);
    match &entry.value {
        Some(value) => println!("{}{} {} ({})", indent, marker(entry.severity), entry.label, value),
        None => println!("{}{} {}", indent, marker(entry.severity), entry.label),
    }
    for child in &entry.children {
        print_entry(child, depth + 1);
    }
}

fn print_report(report: &SecurityReport) {
    println!("machguard {} ({})", VERSION, machguard_core::TARGET);
    println!("{}", "=".repeat(60));
    for entry in &report.entries {
        print_entry(entry, 0);
    }
    println!("{}", "-".repeat(60));
    let summary = &report.summary;
    println!(
        "{} passed, {} failed, {} total; {}",
        summary.passed,
        summary.failed,
        summary.total,
        summary.coverage_label()
    );
    if report.is_compromised() {
        println!("Verdict: COMPROMISED");
    } else {
        println!("Verdict: no finding");
    }
}

fn print_signature(binary: &Path, json: bool) -> anyhow::Result<()> {
    let mut nav = MachONavigator::open(binary)?;
    let header = nav.classify(0)?;
    let kind = match &header {
        ImageHeader::Thin(thin) => match thin.arch {
            Arch::Bits32 => format!("thin 32-bit, {} load commands", thin.ncmds),
            Arch::Bits64 => format!("thin 64-bit, {} load commands", thin.ncmds),
        },
        ImageHeader::Fat { nfat_arch } => format!("fat, {nfat_arch} architectures"),
    };
    let location = nav.find_code_signature(&header)?;
    let container = nav.parse_super_blob(&header, location.file_offset)?;

    if json {
        let blobs: Vec<_> = container
            .entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "type": entry.blob_type,
                    "offset": container.blob_offset(entry),
                    "magic": format!("0x{:08x}", entry.magic),
                })
            })
            .collect();
        let output = serde_json::json!({
            "header": kind,
            "offset": location.file_offset,
            "size": location.size,
            "length": container.length,
            "blobs": blobs,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Code signature of {} ({}):", binary.display(), kind);
    println!("  offset 0x{:x}, size {}, declared length {}", location.file_offset, location.size, container.length);
    println!("{:<8} {:>12} {:>12}", "Type", "Offset", "Magic");
    println!("{}", "-".repeat(34));
    for entry in &container.entries {
        println!(
            "{:<8} 0x{:010x} 0x{:08x}",
            entry.blob_type,
            container.blob_offset(entry),
            entry.magic
        );
    }
    println!("\nTotal: {} blobs", container.entries.len());
    Ok(())
}

fn render(value: &plist::Value) -> String {
    match value {
        plist::Value::String(s) => s.clone(),
        plist::Value::Boolean(b) => b.to_string(),
        plist::Value::Integer(i) => i.to_string(),
        plist::Value::Real(r) => r.to_string(),
        plist::Value::Array(items) => {
            let rendered: Vec<_> = items.iter().map(render).collect();
            format!("[{}]", rendered.join(", "))
        },
        plist::Value::Dictionary(dict) => format!("{{{} keys}}", dict.len()),
        plist::Value::Data(data) => format!("<{} bytes>", data.len()),
        _ => "<unsupported>".to_string(),
    }
}
