use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use tracing::debug;

use crate::broker::WorkerPool;
use crate::config::FileConfig;
use crate::engine::{CacheMetricsSnapshot, Memoized};
use crate::file::{FileCache, FileStrategy, JsonCodec, SnapshotCodec};
use crate::logger;
use crate::memory::{LruStrategy, MemoryCache};

#[derive(Parser, Debug)]
#[command(name = "funcache", version, about = "Function result cache harness")]
pub struct FuncacheCli {
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    /// Increase log verbosity (-v info, -vv debug).
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

impl FuncacheCli {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs two slow cached functions over a repeated range of inputs.
    Bench {
        /// Worker count; defaults to the available parallelism.
        #[arg(short, long)]
        workers: Option<usize>,
        /// Call everything on the main thread.
        #[arg(long, conflicts_with = "threads")]
        no_pool: bool,
        /// Use plain threads sharing one cache handle instead of workers.
        #[arg(long)]
        threads: bool,
        /// Disable both caches before running.
        #[arg(long)]
        deactivate: bool,
        /// Directory for the durable cache; `FUNCACHE_DIR` or the default otherwise.
        #[arg(long)]
        root: Option<PathBuf>,
        /// How many times the input range is repeated.
        #[arg(long, default_value_t = 100)]
        repeat: usize,
        /// Number of distinct inputs.
        #[arg(long, default_value_t = 10)]
        distinct: u64,
        /// Leave persisting the file cache to the process exit hook.
        #[arg(long)]
        flush_at_exit: bool,
    },
    /// Prints the entries of a persisted cache file.
    Inspect { path: PathBuf },
}

pub fn run() -> Result<()> {
    let cli = FuncacheCli::parse();
    logger::init_logging(cli.verbose);
    match &cli.command {
        Command::Bench {
            workers,
            no_pool,
            threads,
            deactivate,
            root,
            repeat,
            distinct,
            flush_at_exit,
        } => {
            let mode = if *no_pool {
                BenchMode::Sequential
            } else if *threads {
                BenchMode::Threads
            } else {
                BenchMode::Pool(workers.unwrap_or_else(default_workers))
            };
            let settings = BenchSettings {
                mode,
                deactivate: *deactivate,
                root: root.clone(),
                repeat: *repeat,
                distinct: *distinct,
                flush_at_exit: *flush_at_exit,
            };
            handle_bench(&settings)
        }
        Command::Inspect { path } => handle_inspect(path),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BenchMode {
    Sequential,
    Threads,
    Pool(usize),
}

#[derive(Debug)]
struct BenchSettings {
    mode: BenchMode,
    deactivate: bool,
    root: Option<PathBuf>,
    repeat: usize,
    distinct: u64,
    flush_at_exit: bool,
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn cube_slowly(x: u64) -> u64 {
    thread::sleep(Duration::from_micros(x * 100));
    x.pow(3)
}

fn square_slowly(x: u64) -> u64 {
    thread::sleep(Duration::from_micros(x * 100));
    x.pow(2)
}

fn handle_bench(settings: &BenchSettings) -> Result<()> {
    let memory = MemoryCache::memory();
    let mut file_config = match &settings.root {
        Some(root) => FileConfig::with_root(root),
        None => FileConfig::from_env(),
    };
    // Flushed explicitly once the run completes unless the exit hook is asked for.
    file_config.flush_on_exit = settings.flush_at_exit;
    let file = FileCache::file(file_config);

    let cube = memory.wrap(cube_slowly);
    let square = file.wrap(square_slowly);

    if settings.deactivate {
        memory.deactivate();
        file.deactivate();
    }

    let values: Vec<u64> = (0..settings.repeat)
        .flat_map(|_| 0..settings.distinct)
        .collect();
    debug!(calls = values.len(), mode = ?settings.mode, "starting bench");

    let started = Instant::now();
    let total: u64 = match settings.mode {
        BenchMode::Sequential => values.iter().map(|&x| compute(&cube, &square, x)).sum(),
        BenchMode::Threads => values
            .par_iter()
            .map(|&x| compute(&cube, &square, x))
            .sum(),
        BenchMode::Pool(size) => {
            if size == 0 {
                bail!("worker pool needs at least one worker");
            }
            let pool = WorkerPool::new(size);
            memory
                .enable_multi_process(&pool, size)
                .context("failed to share the memory cache")?;
            file.enable_multi_process(&pool, size)
                .context("failed to share the file cache")?;
            pool.map(values, move |ctx, x| {
                compute(&ctx.bind(&cube), &ctx.bind(&square), x)
            })?
            .into_iter()
            .sum()
        }
    };
    let elapsed = started.elapsed();

    if !settings.flush_at_exit {
        file.flush().context("failed to persist the file cache")?;
    }

    println!(
        "{} {:.3}s ({} calls, checksum {})",
        "elapsed".green().bold(),
        elapsed.as_secs_f64(),
        settings.repeat as u64 * settings.distinct,
        total
    );
    print_metrics("memory", &memory.metrics());
    print_metrics("file", &file.metrics());
    Ok(())
}

fn compute(
    cube: &Memoized<u64, u64, LruStrategy>,
    square: &Memoized<u64, u64, FileStrategy>,
    x: u64,
) -> u64 {
    cube.call(x) + square.call(x)
}

fn print_metrics(label: &str, metrics: &CacheMetricsSnapshot) {
    println!(
        "{:>8} hits {} misses {} bypasses {} waits {} evictions {} merged {} flushes {} ({:.1}% hit)",
        label.bold(),
        metrics.hits,
        metrics.misses,
        metrics.bypasses,
        metrics.waits,
        metrics.evictions,
        metrics.merged,
        metrics.flushes,
        metrics.hit_ratio() * 100.0
    );
}

fn handle_inspect(path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let entries = JsonCodec
        .decode(&bytes)
        .with_context(|| format!("{} is not a cache file", path.display()))?;

    let mut entries: Vec<_> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    println!(
        "{} {} ({} entries)",
        "cache".green().bold(),
        path.display(),
        entries.len()
    );
    for (key, value) in entries {
        println!("  {} {} {}", key.to_string().cyan(), "=>".dimmed(), value);
    }
    Ok(())
}
