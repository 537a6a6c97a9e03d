//! Demo driver — runs a scripted debate end to end and prints the
//! decision and audit record.
//!
//! ```bash
//! # Built-in five-reviewer roster
//! conclave --proposal post-42 --body "launch teaser" --audit
//!
//! # Roster and stances from a TOML file
//! conclave --roster council.toml --seed 7
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use conclave::{
    DebateConfig, DebateRunner, HardRule, HardRulePredicate, Judgment, load_weight_store,
    MemoryPersistence, Proposal, ReasoningProvider, Reviewer, ReviewerId, Roster,
    ScriptedProvider, Vote,
};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Roster file (TOML) with reviewer stances; built-in demo roster if
    /// omitted.
    #[arg(long)]
    roster: Option<PathBuf>,

    /// Proposal identifier.
    #[arg(long, default_value = "demo-proposal")]
    proposal: String,

    /// Proposal payload.
    #[arg(long, default_value = "product launch teaser post")]
    body: String,

    /// Seed for speaker selection.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Open-floor turn ceiling.
    #[arg(long, default_value_t = 12)]
    max_turns: u32,

    /// Print the full audit record after the summary.
    #[arg(long, default_value_t = false)]
    audit: bool,
}

/// One reviewer entry in the roster file.
#[derive(Debug, Deserialize)]
struct ReviewerSpec {
    id: String,
    display_name: String,
    weight: f64,
    vote: Vote,
    score: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    dimensions: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    reviewers: Vec<ReviewerSpec>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conclave=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let specs = match &args.roster {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading roster file {}", path.display()))?;
            let file: RosterFile = toml::from_str(&content).context("parsing roster file")?;
            file.reviewers
        }
        None => demo_roster(),
    };

    let roster = Roster::new(
        specs
            .iter()
            .map(|s| Reviewer::new(&s.id, &s.display_name, s.weight))
            .collect(),
    )?;

    let providers: BTreeMap<ReviewerId, Arc<dyn ReasoningProvider>> = specs
        .iter()
        .map(|s| {
            let mut judgment = Judgment::new(s.vote, s.score).with_reasoning(&s.reasoning);
            judgment.dimensions = s.dimensions.clone();
            (
                s.id.clone(),
                Arc::new(ScriptedProvider::fixed(judgment)) as Arc<dyn ReasoningProvider>,
            )
        })
        .collect();

    let config = DebateConfig {
        max_turns: args.max_turns,
        speaker_seed: args.seed,
        hard_rules: vec![HardRule::reject(
            "risk-hard-rule",
            0,
            HardRulePredicate::DimensionOver {
                dimension: "risk".to_string(),
                threshold: 75.0,
            },
        )],
        ..Default::default()
    };

    let persistence = Arc::new(MemoryPersistence::new());
    let weight_store = load_weight_store(persistence.as_ref(), &roster).await;

    let runner = DebateRunner::new(roster, providers, config)?.with_persistence(persistence);
    let report = runner
        .run(Proposal::new(&args.proposal, &args.body), &weight_store)
        .await?;

    println!("{}", report.summary_line());
    for entry in &report.decision.attribution {
        println!(
            "  {} contributed {:.0}% (weight {:.2}, score {:.0})",
            entry.reviewer_id,
            entry.share * 100.0,
            entry.weight,
            entry.score
        );
    }

    if args.audit {
        println!("\n{}", report.audit_markdown());
    }

    Ok(())
}

/// Built-in five-seat council used when no roster file is given.
fn demo_roster() -> Vec<ReviewerSpec> {
    let spec = |id: &str, name: &str, weight, vote, score, reasoning: &str| ReviewerSpec {
        id: id.to_string(),
        display_name: name.to_string(),
        weight,
        vote,
        score,
        reasoning: reasoning.to_string(),
        dimensions: BTreeMap::new(),
    };

    let mut risk = spec(
        "risk",
        "Risk Assessor",
        0.25,
        Vote::Conditional,
        55.0,
        "audience backlash possible, needs a softer angle",
    );
    risk.dimensions.insert("risk".to_string(), 60.0);

    vec![
        spec(
            "trend",
            "Trend Analyst",
            0.2,
            Vote::Approve,
            88.0,
            "rides a rising format",
        ),
        spec(
            "engagement",
            "Engagement Strategist",
            0.2,
            Vote::Approve,
            81.0,
            "strong hook, likely comment bait",
        ),
        spec(
            "brand",
            "Brand Guardian",
            0.2,
            Vote::Conditional,
            64.0,
            "tone drifts from the house voice",
        ),
        risk,
        spec(
            "compliance",
            "Compliance Officer",
            0.15,
            Vote::Approve,
            78.0,
            "no regulatory exposure found",
        ),
    ]
}
