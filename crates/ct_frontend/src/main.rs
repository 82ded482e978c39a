// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Entrypoint for the static CT submission front-end.

use anyhow::Context;
use clap::Parser;
use ct_frontend::config::{self, AppConfig};
use ct_frontend::handlers::{self, AppState, HandlerOptions};
use ct_frontend::storage::{
    posix::{PosixAppender, PosixIssuerStorage},
    sqlite::SqliteDedupStorage,
    CtStorage,
};
use ct_frontend::time::{SystemTimeSource, TimeSource};
use ct_frontend::Log;
use static_ct_api::CheckpointSigner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ct-frontend", about = "Static CT API submission front-end")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Path to the log's ECDSA P-256 signing key in PKCS#8 PEM form.
    #[arg(long)]
    signing_key: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ct_frontend=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    let roots = config.load_roots()?;
    let signing_key = config::load_signing_key(&args.signing_key)?;

    let time_source: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);

    // The checkpoint signer is handed to the appender so that every
    // published tree head carries the log's signed note.
    let checkpoint_signer = CheckpointSigner::new(&config.origin, signing_key.clone())
        .context("failed to create checkpoint signer")?;

    let storage = CtStorage {
        appender: PosixAppender::open(
            config.storage_dir.join("log"),
            checkpoint_signer,
            time_source.clone(),
        )
        .context("failed to open log storage")?,
        issuers: PosixIssuerStorage::new(config.storage_dir.join("public"))
            .context("failed to open issuer storage")?,
        dedup: SqliteDedupStorage::open(&config.storage_dir.join("dedup.db"))
            .context("failed to open deduplication database")?,
    };

    info!(origin = %config.origin, roots = roots.len(), "starting log");

    let listen_addr = config.listen_addr.clone();
    let opts = HandlerOptions {
        deadline: config.http_deadline(),
        mask_internal_errors: config.mask_internal_errors,
    };
    let log = Log::new(
        config.origin.clone(),
        signing_key,
        config.validation_opts()?,
        roots,
        storage,
        time_source,
    )?;

    let app = handlers::router(Arc::new(AppState { log, opts }));

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!("listening on {listen_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
