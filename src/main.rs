use std::sync::Arc;

use anyhow::{Context, Result};

mod controllers;
mod identity;
mod schema;
mod services;
mod store;

use controllers::{GenerationPhase, JobHistory, JobLifecycle};
use identity::{FirebaseSession, FixedIdentity, IdentityProvider};
use schema::{JobRequest, LogoStyle};
use services::{GroqPromptSuggester, PromptSuggester};
use store::{AutoWorker, FirestoreConfig, FirestoreStore, InMemoryStore, RecordStore};

const USAGE: &str = "usage: hexa <command>
  generate <prompt> [style]   submit a logo job and wait for the result
  history                     print the owner's past jobs, newest first
  surprise                    suggest a creative prompt";

fn backends() -> Result<(Arc<dyn RecordStore>, Arc<dyn IdentityProvider>)> {
    if std::env::var("HEXA_STORE").is_ok_and(|v| v == "memory") {
        tracing::info!("using in-memory store with demo worker");
        let store: Arc<dyn RecordStore> =
            Arc::new(InMemoryStore::with_auto_worker(AutoWorker::default()));
        let identity: Arc<dyn IdentityProvider> =
            Arc::new(FixedIdentity("local-user".to_string()));
        return Ok((store, identity));
    }

    let session = Arc::new(FirebaseSession::from_env()?);
    let store: Arc<dyn RecordStore> = Arc::new(FirestoreStore::new(
        FirestoreConfig::from_env()?,
        Arc::clone(&session),
    ));
    Ok((store, session))
}

async fn generate(prompt: String, style: LogoStyle) -> Result<()> {
    let (store, identity) = backends()?;
    let flow = JobLifecycle::new(store, identity);
    let mut rx = flow.watch_phase();

    flow.submit(JobRequest::new(prompt, style)).await?;

    loop {
        rx.changed().await.context("phase channel closed")?;
        let phase = rx.borrow_and_update().clone();
        match phase {
            GenerationPhase::Processing { job_id: Some(id) } => {
                tracing::info!(job_id = %id, "creating your design");
            }
            GenerationPhase::Done { job_id, logo_url } => {
                tracing::info!(job_id = %job_id, "your design is ready");
                println!("{logo_url}");
                return Ok(());
            }
            GenerationPhase::Failed(failure) => {
                anyhow::bail!("generation failed ({:?}): {}", failure.kind, failure.message);
            }
            _ => {}
        }
    }
}

async fn history() -> Result<()> {
    let (store, identity) = backends()?;
    let owner_id = identity.owner_id().await?;

    let feed = JobHistory::new(store);
    let mut rx = feed.watch_view();
    feed.start(&owner_id).await?;

    let view = loop {
        {
            let view = rx.borrow_and_update();
            if view.loaded || view.error.is_some() {
                break (*view).clone();
            }
        }
        rx.changed().await.context("history channel closed")?;
    };
    feed.stop();

    if let Some(error) = view.error {
        anyhow::bail!("could not load history: {error}");
    }
    if view.jobs.is_empty() {
        println!("No history yet. Create your first logo!");
        return Ok(());
    }
    for job in &view.jobs {
        println!(
            "{:<10} {:<10} {}  {}",
            job.status.as_str(),
            job.style.label(),
            job.prompt,
            job.logo_url.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn surprise() -> Result<()> {
    let suggester = GroqPromptSuggester::from_env()?;
    println!("{}", suggester.suggest().await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("generate") => {
            let prompt = args.next().context(USAGE)?;
            let style = match args.next() {
                Some(raw) => raw.parse::<LogoStyle>()?,
                None => LogoStyle::None,
            };
            generate(prompt, style).await
        }
        Some("history") => history().await,
        Some("surprise") => surprise().await,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}
