//! Trace-driven workload driver.
//!
//! Loads a key trace single-threaded on the warm-up arena, then replays a
//! run trace across `--threads` workers and reports throughput.
//!
//! Trace files hold one `<op> <key>` pair per line. Every key of the load
//! trace is inserted whatever its op. In the run trace only `insert` stores
//! `key -> key`; every other op, `update` included, is a search.
//!
//! ```bash
//! cargo run --release -- --threads 8 --load load.txt --run run.txt
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use utree::{InsertOutcome, PoolConfig, UTree};

#[derive(Debug, Parser)]
#[command(name = "utree", about = "Replay a key trace against a uTree index")]
struct Args {
    /// Runtime worker threads.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Warm-up trace, applied on worker 0.
    #[arg(long)]
    load: PathBuf,

    /// Measured trace, split evenly across the workers.
    #[arg(long)]
    run: PathBuf,

    /// Pool capacity in bytes. Overrides `UTREE_POOL_BYTES`.
    #[arg(long)]
    pool_bytes: Option<usize>,

    /// Back the pool with this file. Overrides `UTREE_POOL_FILE`.
    #[arg(long)]
    pool_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Insert(i64),
    Search(i64),
}

impl Op {
    const fn key(self) -> i64 {
        match self {
            Self::Insert(key) | Self::Search(key) => key,
        }
    }
}

fn read_trace(path: &Path) -> Result<Vec<Op>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_trace(&text, &path.display().to_string())
}

fn parse_trace(text: &str, source: &str) -> Result<Vec<Op>> {
    let mut ops = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(op) = fields.next() else { continue };
        let Some(key) = fields.next() else {
            bail!("{source}:{}: missing key", lineno + 1);
        };
        let key: i64 = key
            .parse()
            .with_context(|| format!("{source}:{}: bad key {key:?}", lineno + 1))?;

        ops.push(match op {
            "insert" => Op::Insert(key),
            _ => Op::Search(key),
        });
    }

    Ok(ops)
}

fn replay(tree: &UTree, worker_id: usize, ops: &[Op], abandoned: &AtomicU64) -> Result<()> {
    let worker = tree
        .worker(worker_id)
        .with_context(|| format!("registering worker {worker_id}"))?;

    for &op in ops {
        match op {
            Op::Insert(key) => {
                #[expect(clippy::cast_sign_loss, reason = "keys double as values")]
                let value = key as u64;
                if tree.insert(&worker, key, value)? == InsertOutcome::Abandoned {
                    abandoned.fetch_add(1, Ordering::Relaxed);
                }
            }
            Op::Search(key) => {
                std::hint::black_box(tree.search(key));
            }
        }
    }

    Ok(())
}

fn report(phase: &str, ops: usize, elapsed: Duration) {
    #[expect(clippy::cast_precision_loss, reason = "throughput display")]
    let mops = ops as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / 1e6;
    println!("{phase}: {ops} ops in {elapsed:.2?} ({mops:.3} Mops/s)");
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.threads == 0 {
        bail!("--threads must be at least 1");
    }

    let mut config = PoolConfig::from_env(args.threads)?;
    if let Some(bytes) = args.pool_bytes {
        config = config.with_capacity(bytes);
    }
    if let Some(path) = args.pool_file {
        config = config.with_backing_file(path);
    }

    let load: Vec<Op> = read_trace(&args.load)?
        .into_iter()
        .map(|op| Op::Insert(op.key()))
        .collect();
    let run = read_trace(&args.run)?;

    let tree = UTree::open(&config).context("opening index")?;
    let abandoned = AtomicU64::new(0);

    let start = Instant::now();
    replay(&tree, 0, &load, &abandoned)?;
    report("load", load.len(), start.elapsed());

    let chunk = run.len().div_ceil(args.threads).max(1);
    let start = Instant::now();
    thread::scope(|s| -> Result<()> {
        let handles: Vec<_> = run
            .chunks(chunk)
            .enumerate()
            .map(|(i, ops)| {
                let (tree, abandoned) = (&tree, &abandoned);
                s.spawn(move || replay(tree, i + 1, ops, abandoned))
            })
            .collect();

        for h in handles {
            match h.join() {
                Ok(result) => result?,
                Err(_) => bail!("worker thread panicked"),
            }
        }
        Ok(())
    })?;
    report("run", run.len(), start.elapsed());

    let inserted = run.iter().filter(|op| matches!(op, Op::Insert(_))).count();
    println!("run mix: {inserted} writes, {} reads", run.len() - inserted);
    println!("abandoned: {}", abandoned.load(Ordering::Relaxed));
    println!("stats: {}", tree.stats());

    tree.close();
    Ok(())
}
