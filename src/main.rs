use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mkvdedup::dedup::stats::{format_size, print_info};
use mkvdedup::dedup::{BuildConfig, DedupBuilder};
use mkvdedup::indexer::{Indexer, IndexerConfig, ParsePolicy};
use mkvdedup::mmap::{ByteSource, MmapOpener, SourceOpener};
use mkvdedup::reader::Reader;
use mkvdedup::utils::progress::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mkvdedup")]
#[command(about = "Deduplicate Matroska files against each other and read them back")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Hide progress spinners
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a dedup file for the last source (or --primary) from all sources
    Build {
        /// Source files, in id order
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Where to write the dedup file
        #[arg(short, long)]
        output: PathBuf,

        /// Position of the file to deduplicate in the source list
        #[arg(long)]
        primary: Option<usize>,

        /// Matcher worker threads (default: one per core)
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Shortest run worth referencing, in bytes
        #[arg(long)]
        min_run: Option<u64>,

        /// Store source paths relative to the output directory
        #[arg(long)]
        relative: bool,
    },
    /// Show what a dedup file references
    Info {
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Re-hash every entry against its source
    Verify {
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Write the reconstructed bytes to stdout or a file
    Cat {
        file: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// First logical byte to write
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes to write (default: to the end)
        #[arg(long)]
        length: Option<u64>,
    },
    /// List the chunks the indexer finds in a source
    Chunks {
        source: PathBuf,

        /// Skip corrupt regions instead of stopping
        #[arg(long)]
        resync: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            sources,
            output,
            primary,
            workers,
            min_run,
            relative,
        } => {
            let mut config = BuildConfig {
                primary,
                relative_paths: relative,
                ..BuildConfig::default()
            };
            if let Some(workers) = workers {
                config.matcher.num_workers = workers.max(1);
            }
            if let Some(min_run) = min_run {
                config.matcher.min_run_length = min_run;
            }
            build(&sources, &output, config, cli.quiet)?;
        }
        Commands::Info { file, json } => {
            let reader = Reader::open_lazy(&file)
                .with_context(|| format!("cannot open {}", file.display()))?;
            let info = reader.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_info(&info);
            }
        }
        Commands::Verify { file, json } => verify(&file, json, cli.quiet)?,
        Commands::Cat {
            file,
            output,
            offset,
            length,
        } => cat(&file, output.as_deref(), offset, length)?,
        Commands::Chunks { source, resync, json } => chunks(&source, resync, json)?,
    }

    Ok(())
}

fn spinner(quiet: bool, message: &'static str) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

fn build(sources: &[PathBuf], output: &Path, config: BuildConfig, quiet: bool) -> Result<()> {
    let progress = spinner(quiet, "Indexing and matching sources...")?;
    let summary = DedupBuilder::new(config)
        .build(sources, output)
        .with_context(|| format!("cannot build {}", output.display()));
    progress.finish_and_clear();
    let summary = summary?;

    println!("Dedup file:       {}", summary.output.display());
    println!("Logical size:     {}", format_size(summary.logical_size));
    println!("Entries:          {}", summary.entry_count);
    println!(
        "Deduplicated:     {} ({:.1}%)",
        format_size(summary.deduplicated_bytes),
        percent(summary.deduplicated_bytes, summary.logical_size)
    );
    for (id, bytes) in summary.source_bytes.iter().enumerate() {
        if *bytes > 0 {
            println!("  #{id} {:>12}  {}", format_size(*bytes), sources[id].display());
        }
    }
    Ok(())
}

fn verify(file: &Path, json: bool, quiet: bool) -> Result<()> {
    let reader =
        Reader::open_lazy(file).with_context(|| format!("cannot open {}", file.display()))?;
    let progress = spinner(quiet, "Verifying entries...")?;
    let report = reader.verify_integrity();
    progress.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !report.fingerprints_present {
        println!("{} carries no entry fingerprints; nothing to verify", file.display());
    } else {
        println!(
            "Checked {} entries ({})",
            report.entries_checked,
            format_size(report.bytes_checked)
        );
        for m in &report.mismatches {
            println!(
                "  entry {} (source #{}): expected {:016x}, found {:016x}",
                m.entry, m.source_id, m.expected, m.actual
            );
        }
        for f in &report.failures {
            println!("  entry {} (source #{}): {}", f.entry, f.source_id, f.reason);
        }
    }

    if !report.is_clean() {
        bail!(
            "{} mismatched and {} unreadable entries",
            report.mismatches.len(),
            report.failures.len()
        );
    }
    Ok(())
}

fn cat(file: &Path, output: Option<&Path>, offset: u64, length: Option<u64>) -> Result<()> {
    let reader =
        Reader::open_lazy(file).with_context(|| format!("cannot open {}", file.display()))?;
    let mut cursor = reader.cursor();
    cursor.seek(SeekFrom::Start(offset))?;
    let mut input = cursor.take(length.unwrap_or(u64::MAX));

    let written = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            let n = io::copy(&mut input, &mut out)?;
            out.flush()?;
            n
        }
        None => {
            let mut out = io::stdout().lock();
            let n = io::copy(&mut input, &mut out)?;
            out.flush()?;
            n
        }
    };
    tracing::debug!(bytes = written, "wrote reconstructed bytes");
    Ok(())
}

fn chunks(source: &Path, resync: bool, json: bool) -> Result<()> {
    let policy = if resync { ParsePolicy::Resync } else { ParsePolicy::Abort };
    let indexer = Indexer::new(IndexerConfig { policy });
    let bytes = MmapOpener::default()
        .open(source)
        .with_context(|| format!("cannot map {}", source.display()))?;

    let (chunks, skipped, error) = match indexer.index_bytes(bytes.bytes()) {
        Ok(list) => (list.chunks, list.skipped, None),
        Err(partial) => (partial.chunks, Vec::new(), Some(partial.error)),
    };

    if json {
        let value = serde_json::json!({
            "chunks": chunks,
            "skipped": skipped.iter().map(|r| [r.start, r.end]).collect::<Vec<_>>(),
            "error": error.as_ref().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        for chunk in &chunks {
            println!("{:>12} {:>10} {:016x}", chunk.offset, chunk.length, chunk.fingerprint);
        }
        let indexed: u64 = chunks.iter().map(|c| c.length).sum();
        println!(
            "{} chunks, {} of {} in frame payloads",
            chunks.len(),
            format_size(indexed),
            format_size(bytes.len())
        );
        for range in &skipped {
            println!("skipped [{}, {})", range.start, range.end);
        }
    }

    if let Some(error) = error {
        return Err(error).with_context(|| format!("indexing {} stopped early", source.display()));
    }
    Ok(())
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
