use api_client::ComtradeClient;
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use configuration::load_config;
use core_types::{SectorCombine, SortKey, YearMonth};
use database::connection::{connect, run_migrations};
use database::repository::{CommodityFilter, DbRepository, NewCapability};
use etl::{normalize, Fetcher, RetryPolicy};
use jobs::RecomputeJob;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

/// The main entry point for the import-tracking pipeline.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, if present.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;

    // Initialize the database connection and run migrations
    let db_pool = connect().await?;
    run_migrations(&db_pool).await?;

    let db_repo = DbRepository::new(db_pool);

    // Parse command-line arguments
    let cli = Cli::parse();

    // Execute the appropriate command
    match cli.command {
        Commands::Etl(args) => handle_etl(args, &config, db_repo).await?,
        Commands::Recompute => handle_recompute(&config, db_repo).await?,
        Commands::List(args) => handle_list(args, db_repo).await?,
        Commands::Leaderboard(args) => handle_leaderboard(args, db_repo).await?,
        Commands::Detail(args) => handle_detail(args, db_repo).await?,
        Commands::Capability(cmd) => handle_capability(cmd, db_repo).await?,
    }

    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Tracks a country's import dependence and scores onshoring opportunities.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest monthly import records from the external statistics source.
    Etl(EtlArgs),
    /// Recompute every commodity's progress and opportunity metrics.
    Recompute,
    /// List commodities with sector/capex filters and metric sorting.
    List(ListArgs),
    /// Top commodities ranked by one metric.
    Leaderboard(LeaderboardArgs),
    /// Full detail for one commodity: snapshot, time series, top partners.
    Detail(DetailArgs),
    /// Manage community-submitted domestic capability entries.
    #[command(subcommand)]
    Capability(CapabilityCommands),
}

#[derive(Parser)]
struct EtlArgs {
    /// First month of the range, inclusive (format: YYYY-MM). Defaults to
    /// the month after the latest one already ingested.
    #[arg(long)]
    from: Option<YearMonth>,

    /// Last month of the range, inclusive (format: YYYY-MM). Defaults to
    /// last month.
    #[arg(long)]
    to: Option<YearMonth>,
}

#[derive(Parser)]
struct ListArgs {
    /// Comma-separated sector filter, e.g. "electronics,energy".
    #[arg(long)]
    sectors: Option<String>,

    /// How multiple sectors combine: "and" or "or".
    #[arg(long, default_value = "or")]
    combine: String,

    /// Sort metric: "opportunity", "progress", or "value".
    #[arg(long, default_value = "opportunity")]
    sort: String,

    /// Minimum capital requirement the caller can meet.
    #[arg(long)]
    min_capex: Option<Decimal>,

    /// Maximum capital requirement the caller can meet.
    #[arg(long)]
    max_capex: Option<Decimal>,

    #[arg(long, default_value_t = 50)]
    limit: i64,
}

#[derive(Parser)]
struct LeaderboardArgs {
    /// Ranking metric: "opportunity", "progress", or "value".
    #[arg(long, default_value = "opportunity")]
    metric: String,

    #[arg(long, default_value_t = 20)]
    limit: i64,
}

#[derive(Parser)]
struct DetailArgs {
    /// Commodity code; canonicalized before lookup.
    code: String,
}

#[derive(Subcommand)]
enum CapabilityCommands {
    /// Submit a capability estimate (lands unverified).
    Add(CapabilityAddArgs),
    /// Show the verified capability entries for one commodity.
    List(DetailArgs),
    /// Moderate a submission: mark it verified (or revoke with --revoke).
    Verify(CapabilityVerifyArgs),
}

#[derive(Parser)]
struct CapabilityAddArgs {
    /// Commodity code; canonicalized before insert.
    code: String,

    #[arg(long)]
    capex_min: Option<Decimal>,

    #[arg(long)]
    capex_max: Option<Decimal>,

    /// Comma-separated machine list, e.g. "{smt line,reflow oven}".
    #[arg(long)]
    machines: Option<String>,

    /// Comma-separated skill list.
    #[arg(long)]
    skills: Option<String>,

    #[arg(long)]
    notes: Option<String>,

    #[arg(long)]
    source: Option<String>,
}

#[derive(Parser)]
struct CapabilityVerifyArgs {
    id: i64,

    /// Withdraw verification instead of granting it.
    #[arg(long)]
    revoke: bool,
}

// ==============================================================================
// Command Logic
// ==============================================================================

/// Handles the orchestration of one ETL run.
async fn handle_etl(
    args: EtlArgs,
    config: &configuration::Config,
    db_repo: DbRepository,
) -> anyhow::Result<()> {
    let to = match args.to {
        Some(to) => to,
        None => previous_month()?,
    };
    let latest = match args.from {
        Some(_) => None,
        None => db_repo.latest_year_month().await?,
    };
    let Some((from, to)) = resolve_etl_range(args.from, to, latest) else {
        println!("Nothing to ingest: data is already current through {}", to);
        return Ok(());
    };

    println!("Starting ETL from {} to {}", from, to);

    let source = ComtradeClient::new(&config.source)?;
    let retry = RetryPolicy::from_config(&config.source);
    let fetcher = Fetcher::new(&source, &db_repo, retry);

    let summary = fetcher.run(from, to).await?;

    println!(
        "ETL complete: {} commodities, {} monthly rows, {} malformed rows skipped",
        summary.commodities, summary.monthly_rows, summary.skipped_rows
    );
    for unit in &summary.failed_units {
        eprintln!(
            "Failed unit: period {} page {}: {}",
            unit.period, unit.page, unit.error
        );
    }

    Ok(())
}

/// Handles one full recompute pass over every known commodity.
async fn handle_recompute(
    config: &configuration::Config,
    db_repo: DbRepository,
) -> anyhow::Result<()> {
    println!("Starting recompute");

    let job = RecomputeJob::new(&db_repo, &config.scoring);
    let summary = job.run().await?;

    println!("Recompute complete: {}", serde_json::to_string(&summary)?);
    Ok(())
}

async fn handle_list(args: ListArgs, db_repo: DbRepository) -> anyhow::Result<()> {
    let filter = CommodityFilter {
        sectors: args
            .sectors
            .as_deref()
            .map(normalize::parse_sector_list)
            .unwrap_or_default(),
        combine: parse_combine(&args.combine)?,
        min_capex: args.min_capex,
        max_capex: args.max_capex,
        sort: parse_sort(&args.sort)?,
        limit: args.limit,
    };
    let cards = db_repo.list_commodities(&filter).await?;
    println!("{}", serde_json::to_string_pretty(&cards)?);
    Ok(())
}

async fn handle_leaderboard(args: LeaderboardArgs, db_repo: DbRepository) -> anyhow::Result<()> {
    let cards = db_repo
        .leaderboard(parse_sort(&args.metric)?, args.limit)
        .await?;
    println!("{}", serde_json::to_string_pretty(&cards)?);
    Ok(())
}

async fn handle_detail(args: DetailArgs, db_repo: DbRepository) -> anyhow::Result<()> {
    let code = normalize::canonical_code(&args.code);
    let detail = db_repo.commodity_detail(&code).await?;
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}

async fn handle_capability(
    cmd: CapabilityCommands,
    db_repo: DbRepository,
) -> anyhow::Result<()> {
    match cmd {
        CapabilityCommands::Add(args) => {
            let entry = NewCapability {
                code: normalize::canonical_code(&args.code),
                capex_min: args.capex_min,
                capex_max: args.capex_max,
                machines: args
                    .machines
                    .as_deref()
                    .map(|raw| serde_json::json!(normalize::parse_sector_list(raw))),
                skills: args
                    .skills
                    .as_deref()
                    .map(|raw| serde_json::json!(normalize::parse_sector_list(raw))),
                notes: args.notes,
                source: args.source,
            };
            let id = db_repo.insert_capability(&entry).await?;
            println!("Capability submission recorded with id {} (unverified)", id);
        }
        CapabilityCommands::List(args) => {
            let code = normalize::canonical_code(&args.code);
            let rows = db_repo.verified_capabilities(&code).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        CapabilityCommands::Verify(args) => {
            let updated = db_repo
                .set_capability_verified(args.id, !args.revoke)
                .await?;
            if updated {
                println!(
                    "Capability {} is now {}",
                    args.id,
                    if args.revoke { "unverified" } else { "verified" }
                );
            } else {
                eprintln!("No capability entry with id {}", args.id);
            }
        }
    }
    Ok(())
}

fn parse_sort(raw: &str) -> anyhow::Result<SortKey> {
    match raw.to_lowercase().as_str() {
        "opportunity" => Ok(SortKey::Opportunity),
        "progress" => Ok(SortKey::Progress),
        "value" => Ok(SortKey::Value),
        other => anyhow::bail!("unknown sort metric {:?} (expected opportunity, progress, or value)", other),
    }
}

fn parse_combine(raw: &str) -> anyhow::Result<SectorCombine> {
    match raw.to_lowercase().as_str() {
        "and" => Ok(SectorCombine::And),
        "or" => Ok(SectorCombine::Or),
        other => anyhow::bail!("unknown sector combine {:?} (expected and/or)", other),
    }
}

/// Resolves the effective ETL range. An explicitly passed `--from` is always
/// honored; an inverted pair then fails in the fetcher's range validation.
/// A defaulted start landing past `to` means the data is already current.
fn resolve_etl_range(
    explicit_from: Option<YearMonth>,
    to: YearMonth,
    latest: Option<YearMonth>,
) -> Option<(YearMonth, YearMonth)> {
    match explicit_from {
        Some(from) => Some((from, to)),
        None => {
            let from = latest.map(|latest| latest.next()).unwrap_or(to);
            (from.key() <= to.key()).then_some((from, to))
        }
    }
}

/// The month before the current one, the newest period the monthly source
/// can have published.
fn previous_month() -> anyhow::Result<YearMonth> {
    let today = Utc::now().date_naive();
    let (year, month) = if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    };
    Ok(YearMonth::new(year, month)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    #[test]
    fn explicit_inverted_range_flows_through_for_rejection() {
        let range = resolve_etl_range(Some(ym(2024, 5)), ym(2024, 1), None);
        assert_eq!(range, Some((ym(2024, 5), ym(2024, 1))));
    }

    #[test]
    fn defaulted_start_resumes_after_the_latest_month() {
        let range = resolve_etl_range(None, ym(2024, 6), Some(ym(2024, 3)));
        assert_eq!(range, Some((ym(2024, 4), ym(2024, 6))));
    }

    #[test]
    fn defaulted_start_past_the_target_means_nothing_to_do() {
        assert_eq!(resolve_etl_range(None, ym(2024, 6), Some(ym(2024, 6))), None);
        assert_eq!(resolve_etl_range(None, ym(2024, 6), Some(ym(2024, 7))), None);
    }

    #[test]
    fn empty_database_ingests_only_the_target_month() {
        let range = resolve_etl_range(None, ym(2024, 6), None);
        assert_eq!(range, Some((ym(2024, 6), ym(2024, 6))));
    }
}
