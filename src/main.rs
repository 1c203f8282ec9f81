use clap::Parser;
use macsit::{Archive, EntryKind, ExtractOptions, ForkLayout, LocalPacker, UnPacked};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "macsit")]
#[command(version, about = "StuffIt (.sit) archive extractor", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Extract a StuffIt (.sit) file
    Extract {
        /// Path to the StuffIt (.sit) file
        input: PathBuf,

        /// Output directory (defaults to current directory)
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// How resource forks and Finder info are written
        #[arg(short = 'f', long = "format", value_enum, default_value_t = ForkLayout::Rsrc)]
        layout: ForkLayout,

        /// Decode files in parallel
        #[arg(long)]
        parallel: bool,

        /// Don't restore modification times
        #[arg(long)]
        no_times: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
    /// List the contents of a StuffIt (.sit) file
    List {
        /// Path to the StuffIt (.sit) file
        input: PathBuf,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn log_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let verbose = match &args.command {
        Commands::Extract { verbose, .. } | Commands::List { verbose, .. } => *verbose,
    };
    // The library logs through `log`; the subscriber picks those records up.
    tracing_subscriber::fmt()
        .with_max_level(log_level(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match args.command {
        Commands::Extract {
            input,
            output,
            layout,
            parallel,
            no_times,
            verbose: _,
        } => {
            let unpacked = UnPacked::read_local(&input)?;
            let source = unpacked.file();
            let archive = Archive::open(&source.data)?;
            println!(
                "Unarchiving {} ({}, {} entries)...",
                input.display(),
                archive.kind(),
                archive.entries().len()
            );

            let options = ExtractOptions {
                layout,
                parallel,
                restore_times: !no_times,
            };
            let packer = LocalPacker::from_options(output, &options);
            let report = archive.extract_to(&packer, &options)?;

            for warning in &report.warnings {
                eprintln!("Warning: {warning}");
            }
            println!(
                "Extracted {} files and {} folders to {}.",
                report.files,
                report.folders,
                packer.root().display()
            );
            if !report.warnings.is_empty() {
                println!("{} forks could not be extracted.", report.warnings.len());
            }
        }
        Commands::List { input, .. } => {
            let unpacked = UnPacked::read_local(&input)?;
            let source = unpacked.file();
            let archive = Archive::open(&source.data)?;
            println!("{} ({})", input.display(), archive.kind());

            for entry in archive.entries() {
                match entry.kind {
                    EntryKind::Folder => println!("  {}/", entry.display_path()),
                    EntryKind::File if verbose => println!(
                        "  {} (data: {} bytes, method {}; rsrc: {} bytes, method {}; type: {:?}, creator: {:?}, flags: 0x{:04x})",
                        entry.display_path(),
                        entry.data.size,
                        entry.data.method,
                        entry.res.size,
                        entry.res.method,
                        String::from_utf8_lossy(&entry.file_type),
                        String::from_utf8_lossy(&entry.creator),
                        entry.finder_flags
                    ),
                    EntryKind::File => println!(
                        "  {} ({} bytes)",
                        entry.display_path(),
                        u64::from(entry.data.size) + u64::from(entry.res.size)
                    ),
                    EntryKind::EndFolder => {}
                }
            }
        }
    }
    Ok(())
}
