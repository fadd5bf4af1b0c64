use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use werkzoek_client::ReqwestTransport;
use werkzoek_core::{
    CacheConfig, FetchOutcome, Gateway, GatewayConfig, InfiniteSnapshot, InfiniteVacancies,
    Language, MemoryCredentialStore, QueryCache, RetryPolicy, SortOrder, VacancyClient,
    VacancySearch, VacancySearchParams,
};

type Client = VacancyClient<ReqwestTransport, MemoryCredentialStore>;

#[derive(Parser)]
#[command(name = "werkzoek", version, about = "Rate-limited VDAB vacancy search")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// API root (overrides WERKZOEK_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Maximum requests per second (overrides WERKZOEK_RATE_LIMIT)
    #[arg(long, global = true)]
    rate_limit: Option<u32>,

    /// Per-request timeout in seconds (overrides WERKZOEK_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Bearer token for the API
    #[arg(long, env = "WERKZOEK_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Attempts per request for transient failures
    #[arg(long, default_value_t = 1, global = true)]
    attempts: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Search vacancies
    Search {
        #[command(flatten)]
        filters: SearchFilters,

        /// Fetch a single page (1-based)
        #[arg(long, conflicts_with_all = ["pages", "all"])]
        page: Option<u32>,

        /// Keep scrolling for this many pages
        #[arg(long, default_value_t = 1)]
        pages: u32,

        /// Keep scrolling until the last page
        #[arg(long, default_value_t = false)]
        all: bool,
    },

    /// Show one vacancy
    Vacancy {
        id: String,

        #[arg(long, default_value = "nl")]
        lang: Language,
    },

    /// Vacancies similar to a given one
    Similar {
        id: String,

        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// List job domains
    Domains {
        /// Show a single job domain
        #[arg(long, conflicts_with = "children_of")]
        id: Option<String>,

        /// List the children of a job domain
        #[arg(long)]
        children_of: Option<String>,

        #[arg(long, default_value = "nl")]
        lang: Language,
    },
}

#[derive(Args)]
struct SearchFilters {
    /// Free-text query
    #[arg(short, long)]
    query: Option<String>,

    #[arg(long)]
    job_domain: Option<String>,

    #[arg(long)]
    postal_code: Option<String>,

    /// Radius around the postal code, in km
    #[arg(long)]
    distance: Option<u32>,

    /// Page size
    #[arg(short, long, default_value_t = 10)]
    limit: u32,

    #[arg(long, default_value = "relevance")]
    sort: SortOrder,

    #[arg(long, default_value = "nl")]
    lang: Language,
}

impl SearchFilters {
    fn into_params(self) -> VacancySearchParams {
        VacancySearchParams {
            q: self.query,
            job_domain_id: self.job_domain,
            postal_code: self.postal_code,
            distance: self.distance,
            limit: self.limit,
            sort: self.sort,
            lang: self.lang,
            ..VacancySearchParams::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("werkzoek=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    until_interrupted(run(cli), tokio::signal::ctrl_c()).await
}

/// Run `work` to completion, or fail if `interrupt` resolves first. Dropping
/// `work` drops its queued requests.
async fn until_interrupted<W, I>(work: W, interrupt: I) -> Result<()>
where
    W: Future<Output = Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = work => result,
        _ = interrupt => {
            tracing::warn!("Interrupted, dropping queued requests");
            anyhow::bail!("Interrupted")
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let policy = RetryPolicy::default().with_max_attempts(cli.connection.attempts);
    let client = build_client(cli.connection)?;

    match cli.command {
        Commands::Search {
            filters,
            page,
            pages,
            all,
        } => {
            let params = filters.into_params();
            match page {
                Some(page) => {
                    let params = params.with_page(page);
                    let response = policy
                        .run(|| client.search_vacancies(&params))
                        .await
                        .with_context(|| format!("Search for page {page} failed"))?;
                    print_json(&response)?;
                }
                None => {
                    let max_pages = if all { None } else { Some(pages.max(1)) };
                    cmd_scroll(client, params, max_pages, &policy).await?;
                }
            }
        }
        Commands::Vacancy { id, lang } => {
            let vacancy = policy
                .run(|| client.get_vacancy_by_id(&id, Some(lang)))
                .await
                .with_context(|| format!("Failed to load vacancy {id}"))?;
            print_json(&vacancy)?;
        }
        Commands::Similar { id, limit } => {
            let similar = policy
                .run(|| client.get_similar_vacancies(&id, limit))
                .await
                .with_context(|| format!("Failed to load vacancies similar to {id}"))?;
            print_json(&similar)?;
        }
        Commands::Domains {
            id,
            children_of,
            lang,
        } => {
            let lang = Some(lang);
            if let Some(id) = id {
                let domain = policy
                    .run(|| client.get_job_domain_by_id(&id, lang))
                    .await
                    .with_context(|| format!("Failed to load job domain {id}"))?;
                print_json(&domain)?;
            } else if let Some(parent) = children_of {
                let domains = policy
                    .run(|| client.get_child_job_domains(&parent, lang))
                    .await
                    .with_context(|| format!("Failed to load children of {parent}"))?;
                print_json(&domains)?;
            } else {
                let domains = policy
                    .run(|| client.get_job_domains(lang))
                    .await
                    .context("Failed to load job domains")?;
                print_json(&domains)?;
            }
        }
    }

    Ok(())
}

/// Assemble config (env first, flags on top), credentials, and the client.
fn build_client(args: ConnectionArgs) -> Result<Client> {
    let mut config = GatewayConfig::from_env().context("Invalid WERKZOEK_* environment")?;
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url)?;
    }
    if let Some(rate_limit) = args.rate_limit {
        config = config.with_rate_limit(rate_limit)?;
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }

    let credentials = match args.api_key {
        Some(key) if !key.is_empty() => MemoryCredentialStore::with_token(key),
        _ => {
            tracing::info!("No API key configured, requests are unauthenticated");
            MemoryCredentialStore::new()
        }
    };

    tracing::info!(
        base_url = %config.base_url,
        rate_limit = config.rate_limit,
        "Using vacancy API"
    );

    let transport =
        ReqwestTransport::with_timeout(config.timeout).context("Failed to create HTTP client")?;
    let gateway = Gateway::new(transport, credentials, config);
    Ok(VacancyClient::new(gateway).with_cache(QueryCache::new(CacheConfig::default())))
}

/// Page through results with the infinite-scroll controller and print the
/// accumulated snapshot.
async fn cmd_scroll(
    client: Client,
    params: VacancySearchParams,
    max_pages: Option<u32>,
    policy: &RetryPolicy,
) -> Result<()> {
    let snapshot = scroll(client, params, max_pages, policy).await;
    print_json(&snapshot)?;
    if snapshot.is_error {
        anyhow::bail!("Search stopped after {} page(s)", snapshot.pages_loaded);
    }
    Ok(())
}

async fn scroll<S: VacancySearch>(
    source: S,
    params: VacancySearchParams,
    max_pages: Option<u32>,
    policy: &RetryPolicy,
) -> InfiniteSnapshot {
    let pager = InfiniteVacancies::new(source, params);

    loop {
        if max_pages.is_some_and(|max| pager.pages_loaded() >= max as usize) {
            break;
        }
        match policy.run(|| pager.fetch_next_page()).await {
            // The paginator already logs each loaded page at info.
            Ok(FetchOutcome::Fetched { page, new_items }) => {
                tracing::debug!(
                    page,
                    new_items,
                    loaded = pager.items().len(),
                    total = ?pager.total(),
                    "Fetched page"
                );
            }
            Ok(FetchOutcome::Exhausted) => {
                tracing::info!("No more pages");
                break;
            }
            Ok(FetchOutcome::AlreadyFetching | FetchOutcome::Superseded) => {}
            Err(e) => {
                let body = e.body();
                tracing::error!(code = %body.code, message = %body.message, "Search failed");
                break;
            }
        }
    }

    pager.snapshot()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
