//! codetriage CLI
//!
//! Cost-aware code review: local pattern matching first, paid remote
//! analysis only where confidence or risk demands it.
//!
//! Run with: codetriage <path> [--depth=quick|standard|thorough] [--budget=N] [--json]

use anyhow::{bail, Context, Result};
use codetriage::agent::HttpAgent;
use codetriage::{
    discover, AnalysisOutcome, CacheStatus, Decision, Depth, FileReport, KnowledgeBase,
    ResultCache, Settings, TriageEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "--help" | "-h" => {
            print_usage();
            return Ok(());
        }
        "--stats" => return run_stats(),
        "--clear-cache" => return run_clear_cache(),
        "--compact-cache" => return run_compact_cache(),
        _ => {}
    }

    let mut settings = Settings::from_env();
    let mut root: Option<PathBuf> = None;
    let mut json_output = false;

    for arg in &args[1..] {
        if let Some(v) = arg.strip_prefix("--depth=") {
            settings.depth = Depth::parse(v)
                .with_context(|| format!("unknown depth '{}' (quick|standard|thorough)", v))?;
        } else if let Some(v) = arg.strip_prefix("--budget=") {
            settings.budget_ceiling = v
                .parse()
                .with_context(|| format!("invalid budget '{}'", v))?;
        } else if arg == "--json" {
            json_output = true;
        } else if arg.starts_with("--") {
            bail!("unknown flag: {} (try --help)", arg);
        } else {
            root = Some(PathBuf::from(arg));
        }
    }
    let root = root.context("no path given (try --help)")?;

    // A zero budget is a legitimate local-only run and needs no API key
    settings.validate(settings.budget_ceiling > 0.0)?;

    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("cannot create data dir {}", settings.data_dir.display()))?;
    let knowledge = KnowledgeBase::open(&settings.knowledge_path(), settings.learning_rate)?;
    let cache = ResultCache::open(&settings.cache_path())?;
    let agent = Arc::new(HttpAgent::from_settings(&settings)?);

    let files = discover::discover(&root, &settings.include_patterns, &settings.exclude_patterns)?;
    if files.is_empty() {
        eprintln!("No matching files under {}", root.display());
        return Ok(());
    }
    info!(
        files = files.len(),
        budget = settings.budget_ceiling,
        "starting triage run"
    );

    let engine = Arc::new(TriageEngine::new(settings, knowledge, cache, agent));

    // First Ctrl-C stops new remote calls; in-flight work still lands
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted: finishing in-flight analysis, no new remote calls");
                engine.cancel();
            }
        });
    }

    let reports = Arc::clone(&engine).run(files).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
        print_summary(&reports, engine.total_spend(), engine.remaining_budget());
    }

    Ok(())
}

fn print_report(report: &FileReport) {
    let marker = match report.outcome {
        AnalysisOutcome::Degraded => "!",
        AnalysisOutcome::SkippedLocal => "-",
        _ => " ",
    };
    println!(
        "{} {:<50} score {:>3}  {}/{}  ${:.4}{}",
        marker,
        report.path.display(),
        report.overall_score,
        report.decision.name(),
        report.outcome.name(),
        report.cost,
        if report.cache == CacheStatus::Hit {
            "  (cached)"
        } else {
            ""
        }
    );
    for issue in &report.issues {
        println!("    [{}] {}: {}", issue.severity.name(), issue.title, issue.description);
    }
    for warning in &report.warnings {
        println!("    warning: {}", warning);
    }
}

fn print_summary(reports: &[FileReport], spend: f64, remaining: f64) {
    let count = |d: Decision| reports.iter().filter(|r| r.decision == d).count();
    let hits = reports
        .iter()
        .filter(|r| r.cache == CacheStatus::Hit)
        .count();
    let degraded = reports
        .iter()
        .filter(|r| r.outcome == AnalysisOutcome::Degraded)
        .count();

    println!();
    println!(
        "{} files: {} skipped, {} validated, {} escalated, {} cache hits, {} degraded",
        reports.len(),
        count(Decision::Skip),
        count(Decision::Validate),
        count(Decision::Escalate),
        hits,
        degraded
    );
    println!("spend ${:.4}, remaining ${:.4}", spend, remaining);
}

fn run_stats() -> Result<()> {
    let settings = Settings::from_env();
    let knowledge = KnowledgeBase::open(&settings.knowledge_path(), settings.learning_rate)?;
    let cache = ResultCache::open(&settings.cache_path())?;

    let kb_stats = knowledge.stats()?;
    let (cached_results, cached_cost) = cache.stats()?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "knowledge": kb_stats,
            "cache": {
                "live_results": cached_results,
                "saved_cost": cached_cost,
            },
        }))?
    );
    Ok(())
}

fn run_clear_cache() -> Result<()> {
    let settings = Settings::from_env();
    let cache = ResultCache::open(&settings.cache_path())?;
    cache.clear()?;
    println!("Cache cleared");
    Ok(())
}

fn run_compact_cache() -> Result<()> {
    let settings = Settings::from_env();
    let cache = ResultCache::open(&settings.cache_path())?;
    let removed = cache.compact()?;
    println!("Removed {} expired entries", removed);
    Ok(())
}

fn print_usage() {
    println!(
        "codetriage - cost-aware code review\n\
         \n\
         Usage:\n\
         \x20 codetriage <path> [options]   Analyze a file or directory tree\n\
         \x20 codetriage --stats            Knowledge base and cache statistics\n\
         \x20 codetriage --clear-cache      Drop all cached results\n\
         \x20 codetriage --compact-cache    Drop expired cached results\n\
         \n\
         Options:\n\
         \x20 --depth=quick|standard|thorough   Analysis depth (default: standard)\n\
         \x20 --budget=N                        Session budget ceiling in dollars\n\
         \x20 --json                            Emit full reports as JSON\n\
         \n\
         Configuration comes from TRIAGE_* environment variables\n\
         (TRIAGE_MODEL, TRIAGE_BUDGET, TRIAGE_SKIP_THRESHOLD, TRIAGE_DATA_DIR, ...)."
    );
}
