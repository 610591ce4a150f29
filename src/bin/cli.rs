use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use referralguard::prelude::*;
use referralguard::analytics::ConcentrationAnalyzer;
use referralguard::constants::{DEFAULT_INSIGHTS_FILE, DEFAULT_MODEL_FILE, DEFAULT_REPORT_FILE};
use referralguard::export;
use referralguard::ReferralGuardError;

#[derive(Parser)]
#[command(name = "rgcli")]
#[command(about = "ReferralGuard CLI - Analyze provider markets, train and serve risk scores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate raw CMS files into the market insights artifact
    Analyze(AnalyzeArgs),
    /// Train the risk model from a persisted insights artifact
    Train(TrainArgs),
    /// Score a batch of provider-market observations
    Score(ScoreArgs),
    /// Show summary statistics for an insights artifact
    Stats(StatsArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Path to the Medicare utilization CSV
    #[arg(short, long)]
    billing: PathBuf,
    /// Path to the NPPES main CSV (provider names)
    #[arg(long)]
    nppes: Option<PathBuf>,
    /// Path to the NPPES endpoint CSV (affiliations)
    #[arg(long)]
    endpoints: Option<PathBuf>,
    /// Output path for the insights artifact
    #[arg(short, long, default_value = DEFAULT_INSIGHTS_FILE)]
    output: PathBuf,
    /// Skip malformed rows instead of failing
    #[arg(long)]
    skip_invalid: bool,
}

#[derive(Args)]
struct TrainArgs {
    /// Path to the insights artifact to train from
    #[arg(short, long, default_value = DEFAULT_INSIGHTS_FILE)]
    insights: PathBuf,
    /// Output path for the model artifact
    #[arg(long, default_value = DEFAULT_MODEL_FILE)]
    model_out: PathBuf,
    /// Output path for the performance report
    #[arg(long, default_value = DEFAULT_REPORT_FILE)]
    report_out: PathBuf,
    /// Fold the revenue sub-rule into the primary label
    #[arg(long)]
    include_revenue_rule: bool,
}

#[derive(Args)]
struct ScoreArgs {
    /// Path to the model artifact
    #[arg(short, long, default_value = DEFAULT_MODEL_FILE)]
    model: PathBuf,
    /// Path to the insights artifact used as the lookup snapshot
    #[arg(short, long, default_value = DEFAULT_INSIGHTS_FILE)]
    insights: PathBuf,
    /// JSON file holding an array of scoring requests
    #[arg(long)]
    input: PathBuf,
    /// Output path; omit to print to stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct StatsArgs {
    /// Path to the insights artifact
    #[arg(short, long, default_value = DEFAULT_INSIGHTS_FILE)]
    insights: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze(args) => cmd_analyze(args),
        Commands::Train(args) => cmd_train(args),
        Commands::Score(args) => cmd_score(args),
        Commands::Stats(args) => cmd_stats(args),
    }
}

fn cmd_analyze(args: AnalyzeArgs) {
    let mut builder = MarketDatasetBuilder::new()
        .billing_data(&args.billing)
        .skip_invalid_records(args.skip_invalid);
    if let Some(nppes) = &args.nppes {
        builder = builder.provider_names(nppes);
    }
    if let Some(endpoints) = &args.endpoints {
        builder = builder.endpoints(endpoints);
    }

    match builder.build() {
        Ok(dataset) => {
            let insights = dataset.insights();
            match export::write_insights(&insights, &args.output) {
                Ok(()) => {
                    println!(
                        "Saved insights to {} ({} markets, {} opportunities)",
                        args.output.display(),
                        insights.summary.total_markets_analyzed,
                        insights.leakage_opportunities.len(),
                    );
                }
                Err(e) => {
                    eprintln!("Error writing insights: {}", e.user_message());
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Error building dataset: {}", e.user_message());
            std::process::exit(1);
        }
    }
}

fn cmd_train(args: TrainArgs) {
    let insights = match export::read_insights(&args.insights) {
        Ok(insights) => insights,
        Err(e) => {
            eprintln!("Error loading insights: {}", e.user_message());
            std::process::exit(1);
        }
    };

    let mut config = PipelineConfig::load();
    config.risk.include_revenue_rule |= args.include_revenue_rule;

    // Recompute market metrics over the persisted records
    let analyzer = ConcentrationAnalyzer::new(&config.risk);
    let analysis = analyzer.analyze(insights.market_analysis);

    let trainer = RiskModelTrainer::new(&config.model, &config.risk, &config.fallback);
    let model = match trainer.train(&analysis) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("Error training model: {}", e.user_message());
            std::process::exit(1);
        }
    };

    if let Err(e) = model.save(&args.model_out) {
        eprintln!("Error saving model: {}", e.user_message());
        std::process::exit(1);
    }
    println!("Saved model to {}", args.model_out.display());

    let report = PerformanceReport::from_model(&model);
    if let Err(e) = export::write_performance_report(&report, &args.report_out) {
        eprintln!("Error saving performance report: {}", e.user_message());
        std::process::exit(1);
    }
    println!("Saved performance report to {}", args.report_out.display());
}

fn cmd_score(args: ScoreArgs) {
    let config = PipelineConfig::load();

    // A missing or unreadable model degrades to rule-based scoring; the
    // score command never hard-fails for lack of a trained artifact
    let model = match TrainedModel::load(&args.model) {
        Ok(model) => Some(model),
        Err(e) => {
            eprintln!("Notice: {}; falling back to rule-based scoring", e);
            None
        }
    };

    let lookup = match export::read_insights(&args.insights) {
        Ok(insights) => MarketLookup::from_records(&insights.market_analysis),
        Err(e) => {
            eprintln!("Notice: {}; scoring without a market snapshot", e);
            MarketLookup::empty()
        }
    };

    let requests = match read_requests(&args.input) {
        Ok(requests) => requests,
        Err(e) => {
            eprintln!("Error reading scoring requests: {}", e.user_message());
            std::process::exit(1);
        }
    };

    let scorer = match RiskScorer::new(model, lookup, config.fallback, config.risk) {
        Ok(scorer) => scorer,
        Err(e) => {
            eprintln!("Error preparing scorer: {}", e.user_message());
            std::process::exit(1);
        }
    };

    let response = scorer.score_batch(&requests);
    if let Err(e) = export::write_scoring_response(&response, args.output.as_deref()) {
        eprintln!("Error writing scoring output: {}", e.user_message());
        std::process::exit(1);
    }

    eprintln!(
        "Scored {} observations: avg risk {:.1}, {} high risk, ${:.2} revenue at risk",
        response.summary.total_scored,
        response.summary.average_risk_score,
        response.summary.high_risk_count,
        response.summary.total_revenue_at_risk,
    );
}

fn cmd_stats(args: StatsArgs) {
    match export::read_insights(&args.insights) {
        Ok(insights) => {
            let summary = &insights.summary;
            println!("=== Market Insights Statistics ===");
            println!("Markets Analyzed: {}", summary.total_markets_analyzed);
            println!("High-Concentration Markets: {}", summary.high_concentration_markets);
            println!("Fragmented Markets: {}", summary.fragmented_markets);
            println!("Total Revenue Analyzed: ${:.2}", summary.total_revenue_analyzed);
            println!("Average Market Share: {:.1}%", summary.average_market_share);
            println!("Provider Networks: {}", summary.provider_networks_count);
            println!("Multi-Affiliation Providers: {}", summary.multi_affiliation_providers);
            println!("Leakage Opportunities: {}", insights.leakage_opportunities.len());
            println!("Market Records Retained: {}", insights.market_analysis.len());
        }
        Err(e) => {
            eprintln!("Error loading insights: {}", e.user_message());
            std::process::exit(1);
        }
    }
}

fn read_requests(path: &PathBuf) -> Result<Vec<ScoringRequest>> {
    if !path.exists() {
        return Err(ReferralGuardError::file_not_found_with_suggestion(path.clone()));
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| ReferralGuardError::Custom {
        message: format!("Failed to parse scoring requests: {}", e),
        suggestion: Some(
            "The input must be a JSON array of provider-market observations".to_string(),
        ),
    })
}
