use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use vtimport::demangle::GnuDemangler;
use vtimport::extract::{self, VTableExtractor};
use vtimport::import::{DuplicatePolicy, ImportOptions};
use vtimport::plugin::{self, CommandRegistry, FixedPath, ImportOutcome, PluginContext};
use vtimport::print;
use vtimport::ty::TypeSystem;


/// vtimport - extract C++ vtables from binaries and import them as types
#[derive(Debug, Parser)]
#[command(name = "vtimport", version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract all vtables of a Mach-O binary.
    Extract {
        /// Path to the Mach-O binary.
        #[arg(value_name = "BINARY")]
        path: PathBuf,

        /// Write the JSON description to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a human-readable listing instead of JSON.
        #[arg(long)]
        text: bool,
    },

    /// Import a JSON description into a fresh type system and print 
    /// the resulting structures.
    Import {
        /// Path to the JSON description.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Size of pointers, in bytes.
        #[arg(long, default_value_t = 8)]
        pointer_size: u32,

        /// JSON file with import options.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Let the last description win when type names collide.
        #[arg(long)]
        overwrite: bool,
    },
}

fn main() -> anyhow::Result<()> {

    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("vtimport", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    match cli.command {
        Command::Extract { path, output, text } => run_extract(path, output, text),
        Command::Import { path, pointer_size, config, overwrite } => run_import(path, pointer_size, config, overwrite),
    }

}

fn run_extract(path: PathBuf, output: Option<PathBuf>, text: bool) -> anyhow::Result<()> {

    let data = std::fs::read(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let extractor = VTableExtractor::parse(&data)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let vtables = extractor.get_vtables();

    if text {
        print::print_vtables(&vtables);
        return Ok(());
    }

    let file = extract::to_file(&vtables);
    match output {
        Some(output) => {
            let writer = File::create(&output)
                .with_context(|| format!("failed to create {}", output.display()))?;
            file.to_writer(BufWriter::new(writer))?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            file.to_writer(&mut stdout)?;
            writeln!(stdout)?;
        }
    }

    log::info!("extracted {} vtables", vtables.len());
    Ok(())

}

fn run_import(path: PathBuf, pointer_size: u32, config: Option<PathBuf>, overwrite: bool) -> anyhow::Result<()> {

    let mut options = match config {
        Some(config) => {
            let reader = File::open(&config)
                .with_context(|| format!("failed to open {}", config.display()))?;
            serde_json::from_reader::<_, ImportOptions>(reader)
                .with_context(|| format!("invalid import options in {}", config.display()))?
        }
        None => ImportOptions::default(),
    };
    if overwrite {
        options.duplicates = DuplicatePolicy::Overwrite;
    }

    let mut registry = CommandRegistry::new();
    plugin::register_default_commands(&mut registry)?;

    let mut types = TypeSystem::new(pointer_size);
    let mut prompt = FixedPath(path);
    let mut ctx = PluginContext {
        types: &mut types,
        prompt: &mut prompt,
        demangler: &GnuDemangler,
        options,
    };

    let outcome = registry.invoke(plugin::IMPORT_VTABLES, &mut ctx)?;
    if let ImportOutcome::Imported(report) = outcome {
        for built in &report.structures {
            print::print_struct(&types, built.class);
            print::print_struct(&types, built.vtable);
        }
    }

    Ok(())

}
