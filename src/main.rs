use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fhir::{BundleBuilder, ClaimInput, EligibilityInput, ProviderInfo};
use nphies_batch::{
    read_claims, read_eligibility, BatchPipeline, BatchRun, ParsedRecord, PipelineConfig,
    RecordStore,
};
use nphies_certificates::TlsPaths;
use nphies_core::{
    validation, AuthContext, ClaimsService, CommunicationService, EligibilityService, Environment,
    NphiesClient, NphiesConfig, NphiesResult, PriorAuthorizationService,
};

#[derive(Parser)]
#[command(name = "nphies-run")]
#[command(about = "NPHIES batch eligibility, claims and prior-authorization runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an eligibility-check batch
    Eligibility {
        /// Input file (.csv or .json)
        input: PathBuf,
        /// Record store for resumable runs
        #[arg(long, default_value = "eligibility-run.jsonl")]
        store: PathBuf,
        /// Result report file
        #[arg(long, default_value = "eligibility-report.json")]
        output: PathBuf,
        /// Validate and deduplicate only, no NPHIES calls
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a claim-submission batch
    Claims {
        /// Input file (.csv or .json)
        input: PathBuf,
        #[arg(long, default_value = "claims-run.jsonl")]
        store: PathBuf,
        #[arg(long, default_value = "claims-report.json")]
        output: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a prior-authorization batch
    PriorAuth {
        /// Input file (.csv or .json)
        input: PathBuf,
        #[arg(long, default_value = "priorauth-run.jsonl")]
        store: PathBuf,
        #[arg(long, default_value = "priorauth-report.json")]
        output: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Poll queued communications once
    Poll,
}

/// Entry point for the NPHIES batch runner.
///
/// Reads configuration from the environment (a `.env` file is honoured),
/// wires the certificate store, transport and domain services together, and
/// drives the selected batch through the pipeline. Ctrl-C requests
/// cooperative cancellation: in-flight records finish, nothing new starts.
///
/// # Environment Variables
/// - `NPHIES_ENV`: `sandbox` (default) or `production`
/// - `NPHIES_BASE_URL`: clearinghouse base URL
/// - `NPHIES_LICENSE_NUMBER`, `NPHIES_ORGANIZATION_ID`, `NPHIES_PROVIDER_ID`
/// - `NPHIES_CLIENT_CERT`, `NPHIES_CLIENT_KEY`, `NPHIES_CA_BUNDLE`
///   (required in production)
/// - `NPHIES_MAX_RETRIES`, `NPHIES_TIMEOUT_SECS`, `NPHIES_WORKERS`,
///   `NPHIES_RECORD_RETRIES`: optional tunables
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nphies_core=info".parse()?)
                .add_directive("nphies_batch=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = config_from_env()?;
    tracing::info!(environment = %config.environment(), base_url = config.base_url(), "starting nphies-run");

    let auth = AuthContext::from_config(&config)?;
    let client = Arc::new(NphiesClient::new(&config, auth)?);
    let builder = BundleBuilder::new(ProviderInfo {
        organization_id: config.organization_id().to_owned(),
        provider_id: config.provider_id().to_owned(),
        name: std::env::var("NPHIES_PROVIDER_NAME").ok(),
    });

    match cli.command {
        Commands::Eligibility {
            input,
            store,
            output,
            dry_run,
        } => {
            let records = read_eligibility(&input)?;
            if dry_run {
                print_dry_run("eligibility", &records, EligibilityInput::natural_key, |r| {
                    validation::validate_eligibility(r)
                });
                return Ok(());
            }

            let service = Arc::new(EligibilityService::new(client, builder));
            let pipeline = pipeline(&config, &store)?;
            spawn_cancel_on_ctrl_c(&pipeline);
            let run = pipeline
                .run(
                    "eligibility",
                    records,
                    EligibilityInput::natural_key,
                    validation::validate_eligibility,
                    move |record: EligibilityInput| {
                        let service = service.clone();
                        async move { service.check(&record).await }
                    },
                )
                .await?;
            pipeline.write_report(&output, &run)?;
            print_summary(&run, &output);
        }
        Commands::Claims {
            input,
            store,
            output,
            dry_run,
        } => {
            let records = read_claims(&input)?;
            if dry_run {
                print_dry_run("claims", &records, ClaimInput::natural_key, |r| {
                    validation::validate_claim(r)
                });
                return Ok(());
            }

            let service = Arc::new(ClaimsService::new(client, builder));
            let pipeline = pipeline(&config, &store)?;
            spawn_cancel_on_ctrl_c(&pipeline);
            let run = pipeline
                .run(
                    "claims",
                    records,
                    ClaimInput::natural_key,
                    validation::validate_claim,
                    move |record: ClaimInput| {
                        let service = service.clone();
                        async move { service.submit(&record).await }
                    },
                )
                .await?;
            pipeline.write_report(&output, &run)?;
            print_summary(&run, &output);
        }
        Commands::PriorAuth {
            input,
            store,
            output,
            dry_run,
        } => {
            let records = read_claims(&input)?;
            if dry_run {
                print_dry_run("prior-auth", &records, ClaimInput::natural_key, |r| {
                    validation::validate_claim(r)
                });
                return Ok(());
            }

            let service = Arc::new(PriorAuthorizationService::new(client, builder));
            let pipeline = pipeline(&config, &store)?;
            spawn_cancel_on_ctrl_c(&pipeline);
            let run = pipeline
                .run(
                    "prior-auth",
                    records,
                    ClaimInput::natural_key,
                    validation::validate_claim,
                    move |record: ClaimInput| {
                        let service = service.clone();
                        async move { service.request(&record).await }
                    },
                )
                .await?;
            pipeline.write_report(&output, &run)?;
            print_summary(&run, &output);
        }
        Commands::Poll => {
            let service = CommunicationService::new(client, builder);
            let messages = service.poll().await?;
            if messages.is_empty() {
                println!("No queued communications.");
            } else {
                for message in messages {
                    println!(
                        "{}: about {} ({} payload(s))",
                        message.id,
                        message.about.join(", "),
                        message.payloads.len()
                    );
                }
            }
        }
    }

    Ok(())
}

fn config_from_env() -> anyhow::Result<NphiesConfig> {
    let environment: Environment = std::env::var("NPHIES_ENV")
        .unwrap_or_else(|_| "sandbox".into())
        .parse()?;
    let base_url = std::env::var("NPHIES_BASE_URL")
        .unwrap_or_else(|_| "https://sgw.nphies.sa".into());
    let license = std::env::var("NPHIES_LICENSE_NUMBER")
        .context("NPHIES_LICENSE_NUMBER is required")?;
    let organization_id = std::env::var("NPHIES_ORGANIZATION_ID")
        .context("NPHIES_ORGANIZATION_ID is required")?;
    let provider_id =
        std::env::var("NPHIES_PROVIDER_ID").context("NPHIES_PROVIDER_ID is required")?;

    let tls = match (
        std::env::var("NPHIES_CLIENT_CERT"),
        std::env::var("NPHIES_CLIENT_KEY"),
        std::env::var("NPHIES_CA_BUNDLE"),
    ) {
        (Ok(cert), Ok(key), Ok(ca)) => Some(TlsPaths {
            client_cert: cert.into(),
            client_key: key.into(),
            ca_bundle: ca.into(),
        }),
        _ => None,
    };

    let mut config = NphiesConfig::new(
        environment,
        base_url,
        license,
        organization_id,
        provider_id,
        tls,
    )?;
    if let Some(retries) = env_number::<u32>("NPHIES_MAX_RETRIES")? {
        config = config.with_max_retries(retries);
    }
    if let Some(secs) = env_number::<u64>("NPHIES_TIMEOUT_SECS")? {
        config = config.with_request_timeout(std::time::Duration::from_secs(secs));
    }
    if let Some(workers) = env_number::<usize>("NPHIES_WORKERS")? {
        config = config.with_worker_count(workers);
    }
    if let Some(limit) = env_number::<u32>("NPHIES_RECORD_RETRIES")? {
        config = config.with_record_retry_limit(limit);
    }
    Ok(config)
}

fn env_number<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => Ok(Some(
            value
                .trim()
                .parse()
                .with_context(|| format!("{name} must be a number"))?,
        )),
        Err(_) => Ok(None),
    }
}

fn pipeline(config: &NphiesConfig, store: &std::path::Path) -> anyhow::Result<BatchPipeline> {
    let store = RecordStore::open(store)?;
    Ok(BatchPipeline::new(
        store,
        PipelineConfig {
            worker_count: config.worker_count(),
            record_retry_limit: config.record_retry_limit(),
            ..PipelineConfig::default()
        },
    ))
}

fn spawn_cancel_on_ctrl_c(pipeline: &BatchPipeline) {
    let handle = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, finishing in-flight records");
            handle.cancel();
        }
    });
}

fn print_dry_run<I>(
    operation: &str,
    records: &[ParsedRecord<I>],
    natural_key: impl Fn(&I) -> String,
    validate: impl Fn(&I) -> NphiesResult<()>,
) {
    let mut valid = 0usize;
    let mut invalid = 0usize;
    let mut duplicates = 0usize;
    let mut seen = std::collections::HashSet::new();

    for record in records {
        match &record.input {
            Ok(input) => match validate(input) {
                Ok(()) => {
                    if seen.insert(natural_key(input)) {
                        valid += 1;
                    } else {
                        duplicates += 1;
                    }
                }
                Err(e) => {
                    println!("line {}: {e}", record.line);
                    invalid += 1;
                }
            },
            Err(e) => {
                println!("line {}: {e}", record.line);
                invalid += 1;
            }
        }
    }

    println!(
        "{operation} dry run: {} unique valid, {duplicates} duplicate(s), {invalid} invalid \
         ({} rows total, no NPHIES calls made)",
        valid,
        records.len()
    );
}

fn print_summary(run: &BatchRun, output: &std::path::Path) {
    println!(
        "{}: {} records: {} succeeded, {} rejected, {} invalid, {} for review, {} retry-exhausted, {} pending",
        run.operation,
        run.total_records,
        run.succeeded,
        run.rejected,
        run.invalid,
        run.review,
        run.retry_exhausted,
        run.pending,
    );
    println!(
        "dispatched {} ({} skipped via resume, {} retries); report written to {}",
        run.dispatched,
        run.skipped_resume,
        run.retries,
        output.display()
    );
}
