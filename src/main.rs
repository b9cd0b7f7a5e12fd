mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cli::{Cli, Command};
use reviewflow::batch::BatchClient;
use reviewflow::config::ReviewflowConfig;
use reviewflow::notify::{LogNotifier, WebhookNotifier};
use reviewflow::ports::Notifier;
use reviewflow::runner::{Manifest, Runner};
use reviewflow::simulated::{
    DispatchScript, MemoryPersister, RecordingNotifier, ScriptedDispatcher, ScriptedProber,
    SimulatedPreparer,
};
use reviewflow::staging::FsPreparer;
use reviewflow::store::FsResultStore;
use reviewflow::workflow::{
    Collaborators, JobHandle, JobOutcome, RetryPolicy, RunReport, WorkflowEngine,
};
use ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Command::Run {
            game_id,
            job_id,
            source,
        } => {
            let config = ReviewflowConfig::load()?;
            let (engine, preparer) = build_engine(&config)?;
            if let Some(source) = source {
                import(&preparer, &game_id, &job_id, &source).await?;
            }
            let report = run_one(&engine, &game_id, &job_id).await?;
            if report.outcome == JobOutcome::Failed {
                bail!("job {game_id}/{job_id} failed");
            }
        }
        Command::RunAll { manifest } => {
            let config = ReviewflowConfig::load()?;
            let manifest = Manifest::load(&manifest)?;
            let (engine, preparer) = build_engine(&config)?;
            for spec in &manifest.jobs {
                if let Some(source) = &spec.source {
                    import(&preparer, &spec.game_id, &spec.job_id, source).await?;
                }
            }

            let runner = Runner::new(Arc::new(engine));
            let results = runner.run_all(manifest.jobs).await?;
            let mut failed = 0;
            for job in &results {
                let label = format!("{}/{}", job.spec.game_id, job.spec.job_id);
                match &job.result {
                    Ok(report) => {
                        if report.outcome == JobOutcome::Failed {
                            failed += 1;
                        }
                        println!("{label}: {}", report.outcome);
                    }
                    Err(err) => {
                        failed += 1;
                        println!("{label}: aborted ({err})");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} jobs did not succeed", results.len());
            }
        }
        Command::Status { job_handle } => {
            let config = ReviewflowConfig::load()?;
            let client = batch_client(&config)?;
            let job = client.get_job(&JobHandle::new(job_handle)).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Stop { job_handle } => {
            let config = ReviewflowConfig::load()?;
            let client = batch_client(&config)?;
            let handle = JobHandle::new(job_handle);
            client.stop_job(&handle).await?;
            println!("Stop requested for {handle}");
        }
        Command::Demo => run_demo().await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "info,reviewflow=debug"
    } else {
        "warn,reviewflow=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialise logging: {err}");
    }
}

fn batch_client(config: &ReviewflowConfig) -> Result<BatchClient> {
    let mut client = BatchClient::new(&config.batch.base_url, config.batch.model_id.clone())
        .context("invalid batch service configuration")?
        .with_role_arn(config.batch.role_arn.clone());
    if !config.batch.api_key.is_empty() {
        client = client.with_api_key(config.batch.api_key.clone());
    }
    Ok(client)
}

/// Wire the filesystem, HTTP and webhook collaborators from configuration.
fn build_engine(config: &ReviewflowConfig) -> Result<(WorkflowEngine, Arc<FsPreparer>)> {
    let preparer = Arc::new(FsPreparer::new(
        config.staging.data_dir.clone(),
        config.payload_template(),
    ));
    let client = Arc::new(batch_client(config)?);
    let notifier: Arc<dyn Notifier> =
        match (&config.notify.success_url, &config.notify.failure_url) {
            (Some(success), Some(failure)) => {
                Arc::new(WebhookNotifier::new(success.clone(), failure.clone())?)
            }
            _ => Arc::new(LogNotifier),
        };

    let engine = WorkflowEngine::new(Collaborators {
        preparer: preparer.clone(),
        dispatcher: client.clone(),
        prober: client,
        persister: Arc::new(FsResultStore::new(config.store.results_dir.clone())),
        notifier,
    })
    .with_retry_policy(config.retry_policy())
    .with_poll_interval(config.poll_interval())
    .with_max_wait(config.max_wait());

    Ok((engine, preparer))
}

async fn import(preparer: &FsPreparer, game_id: &str, job_id: &str, source: &Path) -> Result<()> {
    let target = preparer
        .import_source(game_id, job_id, source)
        .await
        .with_context(|| format!("failed to import {}", source.display()))?;
    info!(game_id, job_id, file = %target.display(), "review export imported");
    Ok(())
}

async fn run_one(engine: &WorkflowEngine, game_id: &str, job_id: &str) -> Result<RunReport> {
    let progress = JobProgress::start(game_id, job_id);
    let result = engine.run_observed(game_id, job_id, &progress).await;
    progress.complete(&result);
    let report = result?;
    progress.print_report(&report);
    Ok(report)
}

/// Run one job against simulated collaborators: the first dispatch hits the
/// quota, the job then polls a few times before completing.
async fn run_demo() -> Result<()> {
    let suffix = Uuid::new_v4().simple().to_string();
    let job_id = format!("demo-{}", &suffix[..8]);
    let handle = format!("model-invocation-job/{suffix}");

    let notifier = Arc::new(RecordingNotifier::new());
    let engine = WorkflowEngine::new(Collaborators {
        preparer: Arc::new(SimulatedPreparer::new()),
        dispatcher: Arc::new(ScriptedDispatcher::new([
            DispatchScript::QuotaExceeded,
            DispatchScript::handle(handle),
        ])),
        prober: Arc::new(ScriptedProber::new(&[
            "Submitted",
            "InProgress",
            "InProgress",
            "Completed",
        ])),
        persister: Arc::new(MemoryPersister::with_records(["1", "2", "3"])),
        notifier: notifier.clone(),
    })
    .with_retry_policy(RetryPolicy {
        max_attempts: 3,
        initial_wait: Duration::from_secs(2),
        backoff_rate: 2.0,
    })
    .with_poll_interval(Duration::from_secs(1));

    run_one(&engine, "demo-game", &job_id).await?;
    for notification in notifier.sent() {
        println!(
            "notification ({}): {}",
            notification.kind(),
            serde_json::to_string(&notification)?
        );
    }
    Ok(())
}
