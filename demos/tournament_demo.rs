//! Minimal end-to-end cycle for `hypothesis-arena`.
//!
//! Ranks four hypotheses about a cell-biology question and prints the
//! surviving half with their Elo ratings.
//!
//! To run:
//! - Set `ARENA_API_KEY` (or `OPENAI_API_KEY`)
//! - `cargo run --example tournament_demo`

use std::sync::Arc;

use hypothesis_arena::gateway::TracingUsageSink;
use hypothesis_arena::{
    ArenaConfig, Candidate, InMemoryCandidateStore, LlmJudge, ProviderGateway, RankingPipeline,
    ResearchPlan,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Fixed seed so reruns schedule the same rematches.
    let config = ArenaConfig {
        rng_seed: Some(7),
        rounds: 2,
        ..ArenaConfig::default()
    };

    let plan = ResearchPlan::new(
        "Explain why some bacterial persisters survive antibiotic exposure without resistance genes",
    )
    .with_preferences("Prefer mechanisms testable with standard lab equipment")
    .with_attributes(["correctness", "novelty", "testability"]);

    let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))?;
    let judge = LlmJudge::new(gateway, plan, config.judge_config())?;

    let batch = vec![
        Candidate::new("atp", "Persisters enter a low-ATP state that stalls antibiotic targets.")
            .with_review("initial", "Plausible; consistent with ATP depletion studies."),
        Candidate::new("toxin", "Toxin-antitoxin modules trigger dormancy via (p)ppGpp signalling.")
            .with_review("initial", "Well supported in E. coli, weaker in other species."),
        Candidate::new("efflux", "Transient efflux pump overexpression lowers intracellular drug levels.")
            .with_review("initial", "Testable with fluorescent substrate assays."),
        Candidate::new("membrane", "Membrane depolarization reduces aminoglycoside uptake in a subpopulation.")
            .with_review("initial", "Specific to aminoglycosides; narrow but sharp."),
    ];

    let pipeline = RankingPipeline::new(
        Arc::new(judge),
        Arc::new(InMemoryCandidateStore::new()),
        config.tournament_config(),
    );
    let report = pipeline.run_cycle(0, batch).await?;

    println!("stop reason: {:?}", report.stop_reason);
    for (rank, c) in report.retained.iter().enumerate() {
        println!(
            "{}. {} ({:.1}) wins={} losses={}",
            rank + 1,
            c.id,
            c.rating.unwrap_or_default(),
            c.wins.len(),
            c.losses.len()
        );
    }
    println!(
        "judge calls: {}, tokens in/out: {}/{}",
        report.usage.calls, report.usage.input_tokens, report.usage.output_tokens
    );
    Ok(())
}
