use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kmdb_client::{
    FileSessionProvider, HtmlArticleExtractor, InferenceClient, ReqwestFetcher, default_registry,
};
use kmdb_core::dedup::{self, OUTLETS, OutletId};
use kmdb_core::entity::EntityKind;
use kmdb_core::stages::{ClassifyProcessor, DownloadProcessor, KeywordProcessor, ResolveProcessor};
use kmdb_core::text::Boilerplate;
use kmdb_core::worker::StageProcessor;
use kmdb_core::{
    AppError, EntityResolver, KeywordCache, NewArticle, PipelineConfig, Stage, StageQueue,
    StageWorker, TracingWorkerReporter, WorkerConfig,
};
use kmdb_db::{ArticleRepository, Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "kmdb", version, about = "K-Monitor news article pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings for the page fetcher and the model-serving client.
#[derive(Args, Clone)]
struct ClientArgs {
    /// Base URL of the model-serving service
    #[arg(long, env = "KMDB_INFERENCE_URL", default_value = "http://localhost:8000")]
    inference_url: String,

    /// Timeout for one inference request, in seconds
    #[arg(long, env = "KMDB_INFERENCE_TIMEOUT_SECS", default_value_t = 60)]
    inference_timeout: u64,

    /// SOCKS proxy for article downloads (e.g. socks5h://host:1080)
    #[arg(long, env = "KMDB_PROXY")]
    proxy: Option<String>,

    /// JSON file of outlet cookies: {"domain": {"cookie": "value"}}
    #[arg(long, env = "KMDB_COOKIE_FILE", default_value = "cookies.json")]
    cookie_file: PathBuf,

    /// Timeout for one page download, in seconds
    #[arg(long, env = "KMDB_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    fetch_timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage worker and the download-error sweep until Ctrl-C
    Run {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Run the worker of a single stage until Ctrl-C
    RunStage {
        /// Stage to claim from: new, downloaded, classified or resolved
        #[arg(value_parser = parse_stage)]
        stage: Stage,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Queue an article URL for download
    Enqueue {
        url: String,

        /// Outlet id of the feed the URL came from
        #[arg(long)]
        newspaper: Option<i32>,

        /// Submitted by a human; always classified as relevant
        #[arg(long, default_value_t = false)]
        manual: bool,
    },

    /// Print an article and its entity links as JSON
    Show { id: i64 },

    /// List the most recent articles in a stage
    List {
        #[arg(value_parser = parse_any_stage, default_value = "ready")]
        stage: Stage,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Article counts per stage and keyword counts per kind
    Stats,

    /// Put recent download errors back on the queue (once per article)
    RequeueDownloadErrors {
        /// Only articles created within this many days
        #[arg(long)]
        days: Option<i64>,
    },

    /// Check which outlet a story would be attributed to
    Dedup {
        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        text: String,
    },
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    let stage: Stage = s.parse()?;
    if stage.is_claimable() {
        Ok(stage)
    } else {
        Err(format!("'{stage}' has no worker"))
    }
}

fn parse_any_stage(s: &str) -> Result<Stage, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kmdb=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { client } => {
            let db = connect_db().await?;
            let pipeline = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
            cmd_run(&db, &pipeline, &client, &Stage::CLAIMABLE, true).await?;
        }
        Commands::RunStage { stage, client } => {
            let db = connect_db().await?;
            let pipeline = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
            cmd_run(&db, &pipeline, &client, &[stage], false).await?;
        }
        Commands::Enqueue {
            url,
            newspaper,
            manual,
        } => {
            let db = connect_db().await?;
            cmd_enqueue(&db.article_repo(), &url, newspaper, manual).await?;
        }
        Commands::Show { id } => {
            let db = connect_db().await?;
            cmd_show(&db.article_repo(), id).await?;
        }
        Commands::List { stage, limit } => {
            let db = connect_db().await?;
            cmd_list(&db.article_repo(), stage, limit).await?;
        }
        Commands::Stats => {
            let db = connect_db().await?;
            cmd_stats(&db).await?;
        }
        Commands::RequeueDownloadErrors { days } => {
            let db = connect_db().await?;
            let pipeline = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
            let window = days
                .map(chrono::TimeDelta::days)
                .unwrap_or(pipeline.download_retry_window);
            let requeued = db
                .article_repo()
                .requeue_download_errors(window)
                .await
                .context("Download-error sweep failed")?;
            println!("Requeued {requeued} articles");
        }
        Commands::Dedup {
            title,
            description,
            text,
        } => cmd_dedup(&title, &description, &text),
    }

    Ok(())
}

/// Connect to PostgreSQL using `DATABASE_*` variables and run migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("DATABASE_URL not set or invalid")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(db)
}

fn inference_client(args: &ClientArgs) -> Result<InferenceClient> {
    InferenceClient::with_base_url(&args.inference_url)
        .and_then(|c| c.with_timeout(Duration::from_secs(args.inference_timeout)))
        .context("Failed to create inference client")
}

fn fetcher(args: &ClientArgs) -> Result<ReqwestFetcher> {
    let timeout = Duration::from_secs(args.fetch_timeout);
    match &args.proxy {
        Some(proxy) => ReqwestFetcher::with_proxy(timeout, proxy),
        None => ReqwestFetcher::with_timeout(timeout),
    }
    .context("Failed to create HTTP client")
}

fn spawn_worker<P>(
    tasks: &mut Supervisor,
    queue: ArticleRepository,
    processor: P,
    pipeline: &PipelineConfig,
) where
    P: StageProcessor + 'static,
{
    let stage = processor.stage();
    let config = WorkerConfig::for_stage(stage, pipeline);
    let worker = StageWorker::new(queue, processor, config);
    let cancel = tasks.token();
    tasks.spawn(stage.as_str(), async move {
        let reporter = TracingWorkerReporter;
        worker.run(cancel, &reporter).await
    });
}

fn spawn_stage(
    tasks: &mut Supervisor,
    stage: Stage,
    db: &Database,
    pipeline: &PipelineConfig,
    client: &ClientArgs,
) -> Result<()> {
    let queue = db.article_repo();
    match stage {
        Stage::New => {
            let processor = DownloadProcessor::new(
                fetcher(client)?,
                HtmlArticleExtractor::new(),
                default_registry().context("Invalid outlet adapter")?,
                FileSessionProvider::new(&client.cookie_file),
                pipeline.session_refresh,
            )
            .with_boilerplate(
                Boilerplate::load(&pipeline.boilerplate_dir).context("Invalid boilerplate lists")?,
            );
            spawn_worker(tasks, queue, processor, pipeline)
        }
        Stage::Downloaded => {
            let inference = inference_client(client)?;
            let processor = ClassifyProcessor::new(
                inference.clone(),
                inference,
                queue.clone(),
                pipeline.relevance_threshold,
            );
            spawn_worker(tasks, queue, processor, pipeline)
        }
        Stage::Classified => {
            let inference = inference_client(client)?;
            let cache = KeywordCache::new(db.keyword_repo(), &pipeline.synonyms_dir);
            let resolver = EntityResolver::new(inference.clone(), cache);
            spawn_worker(tasks, queue, ResolveProcessor::new(inference, resolver), pipeline)
        }
        Stage::Resolved => spawn_worker(tasks, queue, KeywordProcessor, pipeline),
        other => bail!("No worker for stage {other}"),
    }
    Ok(())
}

fn spawn_sweep(tasks: &mut Supervisor, queue: ArticleRepository, pipeline: &PipelineConfig) {
    let window = pipeline.download_retry_window;
    let every = pipeline.sweep_interval.max(Duration::from_secs(1));
    let cancel = tasks.token();
    tasks.spawn("sweep", async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = queue.requeue_download_errors(window).await {
                        tracing::error!(error = %e, "Download-error sweep failed");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        Ok(())
    });
}

/// Named pipeline tasks sharing one cancellation token.
///
/// The first task to fail or panic cancels the token, so the remaining
/// workers finish their current article and stop.
struct Supervisor {
    tasks: JoinSet<Result<(), AppError>>,
    names: HashMap<task::Id, String>,
    cancel: CancellationToken,
}

impl Supervisor {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            names: HashMap::new(),
            cancel,
        }
    }

    fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn spawn<F>(&mut self, name: &str, future: F)
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let handle = self.tasks.spawn(future);
        self.names.insert(handle.id(), name.to_string());
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every task; returns the first failure.
    async fn wait(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next_with_id().await {
            let (id, error) = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((id, Err(e))) => (id, anyhow::Error::new(e)),
                Err(e) => (e.id(), anyhow::Error::new(e)),
            };
            let name = self.names.get(&id).map_or("unnamed", String::as_str);
            let error = error.context(format!("{name} task failed"));
            tracing::error!(task = %name, error = %error, "Task ended with an error, stopping pipeline");
            self.cancel.cancel();
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn cmd_run(
    db: &Database,
    pipeline: &PipelineConfig,
    client: &ClientArgs,
    stages: &[Stage],
    with_sweep: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, finishing current articles");
                signal_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install Ctrl-C handler"),
        }
    });

    let mut tasks = Supervisor::new(cancel.clone());
    for &stage in stages {
        if let Err(e) = spawn_stage(&mut tasks, stage, db, pipeline, client) {
            cancel.cancel();
            tasks.wait().await.ok();
            return Err(e);
        }
    }
    if with_sweep {
        spawn_sweep(&mut tasks, db.article_repo(), pipeline);
    }
    tracing::info!(tasks = tasks.len(), "Pipeline started");

    tasks.wait().await?;
    tracing::info!("Pipeline stopped");
    Ok(())
}

async fn cmd_enqueue(
    repo: &ArticleRepository,
    url: &str,
    newspaper: Option<i32>,
    manual: bool,
) -> Result<()> {
    let mut article = NewArticle::new(url);
    if let Some(id) = newspaper {
        article = article.with_newspaper(OutletId(id));
    }
    if manual {
        article = article.manual();
    }

    match repo
        .create_article(article)
        .await
        .context("Failed to enqueue article")?
    {
        Some(article) => println!("Enqueued article {} ({})", article.id, article.clean_url),
        None => println!("Already known: {url}"),
    }
    Ok(())
}

async fn cmd_show(repo: &ArticleRepository, id: i64) -> Result<()> {
    let Some(article) = repo.get_article(id).await.context("Failed to load article")? else {
        bail!("Article {id} not found");
    };
    let links = repo.list_links(id).await.context("Failed to load entity links")?;

    let output = serde_json::json!({
        "article": article,
        "links": links,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_list(repo: &ArticleRepository, stage: Stage, limit: usize) -> Result<()> {
    let articles = repo
        .list_by_stage(stage, limit)
        .await
        .context("Failed to list articles")?;
    for article in &articles {
        let reason = article.skip_reason.map(|r| r.as_str()).unwrap_or("");
        println!("{:>8}  {:<16} {}  {}", article.id, reason, article.clean_url, article.title);
    }
    if articles.is_empty() {
        println!("No {stage} articles");
    }
    Ok(())
}

async fn cmd_stats(db: &Database) -> Result<()> {
    let articles = db.article_repo();
    println!("Articles:");
    for stage in Stage::ALL {
        let count = articles
            .count_by_stage(stage)
            .await
            .context("Failed to count articles")?;
        println!("  {:<12} {count}", stage.as_str());
    }

    let keywords = db.keyword_repo();
    println!("\nKeywords:");
    for kind in EntityKind::ALL {
        let count = keywords
            .count_by_kind(kind)
            .await
            .context("Failed to count keywords")?;
        println!("  {:<12} {count}", kind.as_str());
    }
    Ok(())
}

fn cmd_dedup(title: &str, description: &str, text: &str) {
    match dedup::attribute(title, description, text) {
        Some(attribution) => {
            let name = OUTLETS
                .iter()
                .find(|o| o.id == attribution.outlet)
                .map(|o| o.name)
                .unwrap_or("unattributed");
            println!(
                "Attributed to {name} (id {}) by {:?} rule, matched '{}'",
                attribution.outlet, attribution.rule, attribution.matched
            );
        }
        None => println!("No attribution found"),
    }
}
