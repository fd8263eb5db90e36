//! machguard-presets - detection signature database generator.
//!
//! Writes the builtin reference lists, or a database whose digests are
//! taken from an application bundle so the bundle verifies against itself.
//!
//! ## Usage
//!
//! ```bash
//! # Self-hash a bundle into Contents/Resources/SecurityPresets.plist
//! machguard-presets /Applications/App.app
//!
//! # Write the builtin database as a starting point
//! machguard-presets /Applications/App.app --example presets.example.plist
//!
//! # Write the derived database elsewhere
//! machguard-presets /Applications/App.app -o SecurityPresets.plist
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use goblin::mach::{cputype, Mach};
use machguard_core::signatures::PRESETS_FILE_NAME;
use machguard_core::{AppBundle, DetectionSignatureSet};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Detection signature database generator for machguard.
#[derive(Parser)]
#[command(name = "machguard-presets")]
#[command(version = VERSION)]
#[command(about = "Generate and self-hash detection signature databases")]
struct Cli {
    /// Application bundle directory
    bundle: PathBuf,

    /// Also write the builtin database to this path
    #[arg(short, long)]
    example: Option<PathBuf>,

    /// Output path for the derived database
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Where the derived database goes when no output is given.
fn default_output(bundle: &Path) -> PathBuf {
    let resources = bundle.join("Contents").join("Resources");
    if resources.is_dir() {
        resources.join(PRESETS_FILE_NAME)
    } else {
        bundle.join(PRESETS_FILE_NAME)
    }
}

/// Describe the architecture of a thin executable; fat images are refused.
fn describe_executable(path: &Path) -> anyhow::Result<String> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    match Mach::parse(&data).with_context(|| format!("parsing {}", path.display()))? {
        Mach::Binary(macho) => {
            let subtype = macho.header.cpusubtype & !cputype::CPU_SUBTYPE_MASK;
            let arch = cputype::get_arch_name_from_types(macho.header.cputype, subtype).unwrap_or("unknown");
            Ok(format!("{} ({}-bit)", arch, if macho.is_64 { 64 } else { 32 }))
        },
        Mach::Fat(fat) => bail!(
            "{} is a multi-architecture executable ({} slices); thin it first",
            path.display(),
            fat.narches
        ),
    }
}

fn run(cli: &Cli) -> anyhow::Result<PathBuf> {
    let bundle = AppBundle::open(&cli.bundle)
        .with_context(|| format!("opening bundle {}", cli.bundle.display()))?;
    let Some(executable) = bundle.executable.as_deref() else {
        bail!("{} does not name an existing CFBundleExecutable", cli.bundle.display());
    };
    eprintln!("  Bundle: {}", bundle.root.display());
    eprintln!("  Identifier: {}", bundle.identifier.as_deref().unwrap_or("(none)"));
    eprintln!("  Executable: {} [{}]", executable.display(), describe_executable(executable)?);

    let builtin = DetectionSignatureSet::builtin();
    if let Some(example) = &cli.example {
        builtin
            .write_ahead(example)
            .with_context(|| format!("writing {}", example.display()))?;
        eprintln!("  Example: {}", example.display());
    }

    let mut base = builtin;
    if let Some(identifier) = &bundle.identifier {
        base.secure_main_bundle_identifiers.insert(identifier.clone());
    }
    let derived = DetectionSignatureSet::from_bundle(&base, &bundle);
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&bundle.root));
    derived
        .write_ahead(&output)
        .with_context(|| format!("writing {}", output.display()))?;

    let (populated, total) = derived.coverage();
    eprintln!("  Categories: {} of {}", populated, total);
    Ok(output)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    eprintln!("Generating detection signature database...");
    let output = run(&cli)?;
    eprintln!("  Output: {}", output.display());
    eprintln!("\nDatabase generated successfully.");
    Ok(())
}
