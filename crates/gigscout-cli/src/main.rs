use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use gigscout_core::{QueryState, SortCriterion};
use gigscout_discovery::{DiscoveryConfig, LoadMoreOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gigscout")]
#[command(about = "Gig discovery command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one query against the configured source and print the view as JSON.
    Browse(BrowseArgs),
    /// Serve the JSON API.
    Serve,
}

#[derive(Debug, Default, clap::Args)]
struct BrowseArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    sort: Option<SortCriterion>,
    #[arg(long)]
    budget_min: Option<f64>,
    #[arg(long)]
    budget_max: Option<f64>,
    #[arg(long = "skill")]
    skills: Vec<String>,
    #[arg(long)]
    nearby: bool,
    #[arg(long)]
    radius: Option<f64>,
    /// Extra pages to load after the first one.
    #[arg(long, default_value_t = 0)]
    load_pages: usize,
}

impl BrowseArgs {
    fn into_query(self, default_radius_km: f64) -> Result<QueryState> {
        if let (Some(min), Some(max)) = (self.budget_min, self.budget_max) {
            if min > max {
                bail!("--budget-min {min} exceeds --budget-max {max}");
            }
        }
        let mut query = QueryState::default();
        let criteria = &mut query.criteria;
        criteria.search_term = self.search.unwrap_or_default();
        criteria.category = self.category;
        criteria.budget_min = self.budget_min;
        criteria.budget_max = self.budget_max;
        criteria.skills = self.skills;
        criteria.nearby_only = self.nearby;
        criteria.radius_km = self.radius.unwrap_or(default_radius_km);
        query.sort = self.sort;
        Ok(query)
    }
}

async fn browse(args: BrowseArgs) -> Result<()> {
    let config = DiscoveryConfig::from_env();
    let load_pages = args.load_pages;
    let query = args.into_query(config.default_radius_km)?;
    let controller = config.build_controller()?;

    controller.apply_query(query).await;
    for _ in 0..load_pages {
        match controller.load_more().await {
            LoadMoreOutcome::Appended(count) => tracing::debug!(count, "page loaded"),
            outcome => {
                tracing::info!(?outcome, "stopped paging");
                break;
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&controller.view())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gigscout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Browse(BrowseArgs::default())) {
        Commands::Browse(args) => browse(args).await?,
        Commands::Serve => gigscout_web::serve_from_env().await?,
    }
    Ok(())
}
