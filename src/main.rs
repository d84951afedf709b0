use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

use wishlist_worker::core::config::StoreKind;
use wishlist_worker::queue::{
    AmqpBroker, ConsumerLoop, CrawlProductHandler, Dispatcher, Envelope, MessageBroker,
    NoticeHandler, ACCOUNT_UPDATED, CRAWL_PRODUCT, WISHITEM_CREATED, WISHLIST_CREATED,
};
use wishlist_worker::storage::{create_store, StoreType};
use wishlist_worker::{CrawlClient, ResultCommitter, WorkerConfig, WorkerStats};

#[derive(Parser, Debug)]
#[command(name = "wishlist-worker", version, about = "Wishlist product enrichment worker")]
struct Cli {
    /// YAML configuration file; skipped if it does not exist
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Overrides logging.level from the configuration
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume tasks until interrupted (default)
    Run,
    /// Publish a crawl_product task for an existing crawl request
    Enqueue {
        #[arg(long)]
        request_id: String,
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config =
        WorkerConfig::load(Some(cli.config.as_path())).context("loading configuration")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .filter_module("lapin", LevelFilter::Warn)
        .filter_module("sqlx", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Enqueue { request_id, url } => enqueue(config, &request_id, &url).await,
    }
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let store_type = match config.worker.store {
        StoreKind::Memory => {
            warn!(
                "worker.store is memory: crawl requests only exist inside this process, \
                 so every crawl_product task will be discarded as an unknown request"
            );
            StoreType::Memory
        }
        #[cfg(feature = "postgres")]
        StoreKind::Postgres => StoreType::Postgres {
            url: config.database.url()?,
            max_connections: config.database.max_connections,
        },
        #[cfg(not(feature = "postgres"))]
        StoreKind::Postgres => anyhow::bail!("built without the postgres feature"),
    };
    let store = create_store(store_type)
        .await
        .context("opening item store")?;

    let stats = Arc::new(WorkerStats::new());
    let crawler = Arc::new(
        CrawlClient::from_config(&config.crawler)
            .context("building crawl client")?
            .with_stats(Arc::clone(&stats)),
    );
    let committer = Arc::new(
        ResultCommitter::new(store)
            .with_currency(&config.crawler.currency_code)
            .with_stats(Arc::clone(&stats)),
    );

    let notices = Arc::new(NoticeHandler);
    let dispatcher = Dispatcher::new(stats)
        .register(
            CRAWL_PRODUCT,
            Arc::new(CrawlProductHandler::new(crawler, committer)),
        )
        .register(WISHLIST_CREATED, notices.clone())
        .register(WISHITEM_CREATED, notices.clone())
        .register(ACCOUNT_UPDATED, notices);

    let mut broker = AmqpBroker::connect_with_retry(&config.rabbitmq)
        .await
        .context("connecting to RabbitMQ")?;
    broker
        .subscribe(config.rabbitmq.prefetch)
        .await
        .context("subscribing to task queue")?;

    ConsumerLoop::new(Box::new(broker), Arc::new(dispatcher))
        .with_grace(config.worker.shutdown_grace())
        .run(shutdown_signal())
        .await?;
    Ok(())
}

async fn enqueue(config: WorkerConfig, request_id: &str, url: &str) -> anyhow::Result<()> {
    let broker = AmqpBroker::connect_with_retry(&config.rabbitmq)
        .await
        .context("connecting to RabbitMQ")?;
    broker
        .publish(&Envelope::crawl_product(request_id, url))
        .await
        .context("publishing crawl task")?;
    info!("Enqueued crawl of {} for request {}", url, request_id);
    broker.close().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
