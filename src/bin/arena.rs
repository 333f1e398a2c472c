#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hypothesis_arena::config::{ArenaConfig, ResearchPlan};
use hypothesis_arena::gateway::{ProviderGateway, TracingUsageSink};
use hypothesis_arena::oracle::LlmJudge;
use hypothesis_arena::pipeline::RankingPipeline;
use hypothesis_arena::store::{CandidateStore, InMemoryCandidateStore, SqliteCandidateStore};
use hypothesis_arena::tournament::{JsonlTraceSink, TraceSink};
use hypothesis_arena::{Candidate, CandidateId};

#[derive(Parser)]
#[command(name = "arena", version, about = "Hypothesis tournament CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ranking cycle over a batch of candidates
    Rank {
        /// JSON array of candidates
        #[arg(long)]
        candidates: PathBuf,
        /// Research plan JSON
        #[arg(long)]
        plan: PathBuf,
        /// Cycle report output
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// SQLite candidate archive; in-memory when omitted
        #[arg(long)]
        store: Option<PathBuf>,
        /// Hold an exclusive lock on the store for the whole run
        #[arg(long, default_value_t = false)]
        lock_store: bool,
        /// Per-match JSONL trace
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        cycle: u32,
        #[arg(long)]
        rng_seed: Option<u64>,
        #[arg(long)]
        rounds: Option<usize>,
    },
    /// Print a candidate's ancestor chain, newest first
    Lineage {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        id: String,
    },
    /// Export the candidate archive to JSONL
    StoreExport {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rank {
            candidates,
            plan,
            out,
            config,
            store,
            lock_store,
            trace,
            cycle,
            rng_seed,
            rounds,
        } => {
            let mut cfg = match config {
                Some(path) => ArenaConfig::load(path)?,
                None => ArenaConfig::default(),
            };
            if rng_seed.is_some() {
                cfg.rng_seed = rng_seed;
            }
            if let Some(rounds) = rounds {
                cfg.rounds = rounds;
            }
            cfg.validate()?;

            let plan = ResearchPlan::load(plan)?;
            let batch: Vec<Candidate> = read_json(&candidates)?;

            let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))?;
            let judge = LlmJudge::new(gateway, plan, cfg.judge_config())?;

            let mut _lock = None;
            let store: Arc<dyn CandidateStore> = match store {
                Some(path) => {
                    let sqlite = SqliteCandidateStore::new(path)?;
                    if lock_store {
                        _lock = Some(sqlite.lock_exclusive()?);
                    }
                    Arc::new(sqlite)
                }
                None => Arc::new(InMemoryCandidateStore::new()),
            };

            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupt received; stopping at next round boundary");
                        cancel.store(true, Ordering::Relaxed);
                    }
                });
            }

            let mut pipeline =
                RankingPipeline::new(Arc::new(judge), store, cfg.tournament_config())
                    .with_cancel_flag(cancel);
            let mut worker = None;
            if let Some(path) = trace {
                let (sink, w) = JsonlTraceSink::new(path)?;
                let sink: Arc<dyn TraceSink> = Arc::new(sink);
                pipeline = pipeline.with_trace(sink);
                worker = Some(w);
            }

            let result = pipeline.run_cycle(cycle, batch).await;
            drop(pipeline);
            if let Some(worker) = worker {
                worker.join()?;
            }
            let report = result?;
            write_json(&out, &report)?;

            for (rank, c) in report.retained.iter().enumerate() {
                println!(
                    "{:>3}. {:<36} {:>8.1}",
                    rank + 1,
                    c.id,
                    c.rating.unwrap_or_default()
                );
            }
        }
        Commands::Lineage { store, id } => {
            let path = store.unwrap_or_else(SqliteCandidateStore::default_path);
            let store = SqliteCandidateStore::new(path)?;
            for c in store.lineage(&CandidateId::new(id)).await? {
                let rating = c
                    .rating
                    .map(|r| format!("{r:.1}"))
                    .unwrap_or_else(|| "-".to_string());
                println!("cycle {:>3}  {}  {}", c.cycle, c.id, rating);
            }
        }
        Commands::StoreExport { store, out } => {
            let path = store.unwrap_or_else(SqliteCandidateStore::default_path);
            let store = SqliteCandidateStore::new(path)?;
            let written = store.export_jsonl(&out).await?;
            eprintln!("exported {written} candidates to {}", out.display());
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), std::io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}
