//! # `ci-harvest`
//!
//! Mirrors a GitHub repository into the document store and extracts one
//! metrics record per CI workflow run.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ci-harvest retrieve <owner> <repo>` | Ingest repository, commits, PRs, issues, workflows |
//! | `ci-harvest extract <owner> <repo>` | Compute build metrics into `ci_builds` |
//! | `ci-harvest run <owner> <repo>` | Retrieve, then extract, under a tracked request id |
//! | `ci-harvest submit <repo-url>` | Same as `run`, taking a github.com URL |
//! | `ci-harvest status <request-id>` | Show a tracked request |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::info;

use ci_harvest::{
    BuildMetricsExtractor, GitHistoryWalker, GitHubClient, Pipeline, ProjectDatabase, RepoRetriever,
    RequestStatus, RequestTracker, ResourceRepository, Settings, ShutdownFlag, SqliteProjectDb,
    StrippedCache, SummaryStatus, install_ctrl_c_handler, open_document_store, parse_github_url,
};

#[derive(Parser)]
#[command(
    name = "ci-harvest",
    version,
    about = "Mirror GitHub repositories and extract per-build CI metrics"
)]
struct Cli {
    /// Settings file (TOML). Built-in defaults apply when omitted.
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// GitHub token; overrides the settings file and GITHUB_TOKEN
    #[arg(short = 't', long, global = true)]
    token: Option<String>,

    /// Remaining-request floor below which requests wait for the quota reset
    #[arg(short = 'l', long = "req-limit", global = true)]
    req_limit: Option<u32>,

    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest everything about one repository
    Retrieve { owner: String, repo: String },

    /// Compute build metrics for the latest run of every (branch, commit)
    Extract { owner: String, repo: String },

    /// Retrieve then extract, recording progress under a request id
    Run {
        owner: String,
        repo: String,
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Like `run`, for a https://github.com/<owner>/<repo> URL
    Submit {
        repo_url: String,
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Print the recorded status of a request
    Status { request_id: String },
}

struct Services {
    retriever: RepoRetriever,
    extractor: BuildMetricsExtractor,
    tracker: RequestTracker,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let mut settings = settings.with_env_overrides();
    if let Some(token) = &cli.token {
        settings.github_token = Some(token.clone());
    }
    if let Some(limit) = cli.req_limit {
        settings.req_limit = limit;
    }
    settings.validate()?;
    Ok(settings)
}

async fn build_services(settings: &Settings, shutdown: &ShutdownFlag) -> Result<Services> {
    let mut builder = GitHubClient::builder()
        .base_uri(settings.mirror_urlbase.clone())
        .user_agent(settings.user_agent.clone())
        .timeout(settings.request_timeout())
        .req_limit(settings.req_limit);
    if let Some(token) = &settings.github_token {
        builder = builder.personal_token(token.clone());
    }
    let client = builder.build().context("Cannot create GitHub client")?;
    install_ctrl_c_handler(shutdown.clone(), Some(client.rate_limiter().clone()));

    let docs = ResourceRepository::new(
        open_document_store(&settings.documents)
            .await
            .with_context(|| format!("Cannot open document store {}", settings.documents))?,
    );
    let db: Arc<dyn ProjectDatabase> = Arc::new(
        SqliteProjectDb::connect(&settings.sql_url)
            .await
            .with_context(|| format!("Cannot open database {}", settings.sql_url))?,
    );

    let retriever = RepoRetriever::new(client, docs.clone())
        .with_project_db(Arc::clone(&db))
        .pages_back(settings.mirror_history_pages_back)
        .commit_handling(settings.commit_handling);
    let walker = GitHistoryWalker::new(settings.repos_dir.clone(), settings.clone_base_url.clone());
    let extractor = BuildMetricsExtractor::new(db, docs.clone(), walker)
        .with_retriever(retriever.clone())
        .threads(settings.threads)
        .months_back(settings.months_back)
        .stripped_cache(Arc::new(StrippedCache::new(settings.stripped_cache_capacity)))
        .shutdown(shutdown.clone());

    Ok(Services {
        retriever,
        extractor,
        tracker: RequestTracker::new(docs),
    })
}

fn new_request_id() -> String {
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), std::process::id())
}

async fn run_tracked(services: Services, owner: &str, repo: &str, request_id: Option<String>) -> Result<()> {
    let request_id = request_id.unwrap_or_else(new_request_id);
    services.tracker.enqueue(&request_id).await?;
    let pipeline = Pipeline::new(services.retriever, services.extractor, services.tracker);
    let record = pipeline.run_request(owner, repo, &request_id).await;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.status == RequestStatus::Error {
        return Err(anyhow!(
            "Request {request_id} failed: {}",
            record.error.unwrap_or_default()
        ));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = load_settings(&cli)?;
    let shutdown = ShutdownFlag::new();
    let services = build_services(&settings, &shutdown).await?;

    match cli.command {
        Commands::Retrieve { owner, repo } => {
            services.retriever.retrieve_full_repo(&owner, &repo).await?;
        }
        Commands::Extract { owner, repo } => {
            let summary = services.extractor.extract_builds(&owner, &repo).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.status == SummaryStatus::Error {
                return Err(anyhow!(summary.message));
            }
        }
        Commands::Run {
            owner,
            repo,
            request_id,
        } => run_tracked(services, &owner, &repo, request_id).await?,
        Commands::Submit { repo_url, request_id } => {
            let (owner, repo) =
                parse_github_url(&repo_url).ok_or_else(|| anyhow!("Invalid GitHub repo URL: {repo_url}"))?;
            run_tracked(services, &owner, &repo, request_id).await?;
        }
        Commands::Status { request_id } => match services.tracker.status(&request_id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => return Err(anyhow!("Unknown request {request_id}")),
        },
    }

    if shutdown.is_requested() {
        info!("Stopped early on interrupt");
    }
    Ok(())
}
