//! Veritas worker - trust scoring and review moderation
//!
//! Runs the item and review signal consumers against NATS JetStream and
//! MongoDB until interrupted.

use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use veritas::{
    config::Args,
    db::MongoClient,
    jobs::ensure_streams,
    nats::NatsClient,
    signals::{HttpImageMatcher, HttpReviewClassifier, ImageMatcherConfig, ReviewClassifierConfig},
    store::MongoStore,
    worker::{ItemSignalWorker, ReviewSignalWorker, SignalConsumer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let worker_id = args.worker_id();

    info!("======================================");
    info!("  Veritas - trust & moderation workers");
    info!("======================================");
    info!(
        "Build: {} ({})",
        env!("GIT_COMMIT_SHORT"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Worker ID: {}", worker_id);
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB: {} / {}", args.mongo.mongodb_uri, args.mongo.mongodb_db);
    info!("Image matcher: {}", args.signals.image_matcher_url);
    info!("Review analyzer: {}", args.signals.review_analyzer_url);
    info!(
        "Consumers: item={} review={} (max {} concurrent each)",
        args.enable_item_worker, args.enable_review_worker, args.max_concurrent
    );
    info!("======================================");

    let mongo = MongoClient::new(&args.mongo.mongodb_uri, &args.mongo.mongodb_db).await?;
    let store = Arc::new(MongoStore::new(&mongo).await?);

    let nats = NatsClient::new(&args.nats, &format!("veritas-{}", worker_id)).await?;
    ensure_streams(nats.jetstream()).await?;

    let mut consumers: Vec<Arc<SignalConsumer>> = Vec::new();

    if args.enable_item_worker {
        let timeout = args.image_matcher_timeout();
        let matcher = HttpImageMatcher::new(ImageMatcherConfig {
            base_url: args.signals.image_matcher_url.clone(),
            timeout,
        })?;
        let worker = ItemSignalWorker::new(Arc::new(matcher), store.clone())
            .with_policy(args.trust_policy())
            .with_write_attempts(args.retry.write_attempts)
            .with_signal_timeout(timeout);

        consumers.push(Arc::new(SignalConsumer::new(
            args.consumer_config(&worker_id, timeout),
            nats.jetstream().clone(),
            Arc::new(worker),
        )));
    }

    if args.enable_review_worker {
        let timeout = args.review_analyzer_timeout();
        let classifier = HttpReviewClassifier::new(ReviewClassifierConfig {
            base_url: args.signals.review_analyzer_url.clone(),
            timeout,
        })?;
        let worker = ReviewSignalWorker::new(Arc::new(classifier), store.clone(), store.clone())
            .with_policy(args.burst_policy())
            .with_signal_timeout(timeout);

        consumers.push(Arc::new(SignalConsumer::new(
            args.consumer_config(&worker_id, timeout),
            nats.jetstream().clone(),
            Arc::new(worker),
        )));
    }

    let handles: Vec<JoinHandle<()>> = consumers
        .iter()
        .cloned()
        .map(|consumer| {
            tokio::spawn(async move {
                if let Err(e) = consumer.run().await {
                    error!("Consumer error: {}", e);
                }
            })
        })
        .collect();

    let all_done = futures_util::future::join_all(handles);
    tokio::pin!(all_done);

    let exited = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        _ = &mut all_done => {
            error!("All consumers exited");
            true
        }
    };

    for consumer in &consumers {
        consumer.stop().await;
    }

    if !exited {
        let grace = args.shutdown_grace();
        info!("Waiting up to {:?} for in-flight jobs", grace);
        if tokio::time::timeout(grace, &mut all_done).await.is_err() {
            warn!("Consumers still busy after {:?}, leaving jobs for redelivery", grace);
        }
    }

    if let Err(e) = nats.flush().await {
        error!("Failed to flush NATS: {}", e);
    }

    info!("Veritas worker shutting down");
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("veritas={},info", args.log_level).into());

    let fmt_layer = if args.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
