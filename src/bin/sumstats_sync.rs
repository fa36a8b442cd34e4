use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use sumstats_sync::app::{
    App, Area, NoCatalog, ProgressSink, ReleaseRunOptions, SubmitOptions, TracingSink,
};
use sumstats_sync::binning::range_bin;
use sumstats_sync::catalog::{CatalogClient, CatalogHttpClient};
use sumstats_sync::config::{ConfigLoader, Overrides};
use sumstats_sync::domain::{HarmonisationType, Priority, StudyAccession};
use sumstats_sync::error::SyncError;
use sumstats_sync::notify::{NoopNotifier, Notifier, SendmailNotifier};
use sumstats_sync::output::{JsonOutput, OutputMode, queue_report_line, record_line};
use sumstats_sync::queue_store::QueueFilter;
use sumstats_sync::queuer::{AddOptions, QueueReport};
use sumstats_sync::scheduler::{LsfScheduler, PollPolicy};
use sumstats_sync::transfer::{RsyncTransfer, Transfer};

#[derive(Parser)]
#[command(name = "sumstats-sync")]
#[command(about = "Summary statistics release reconciliation and harmonisation queue")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./sumstats-sync.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    staging_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    ftp_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    harmonisation_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    deposition_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    queue_db: Option<Utf8PathBuf>,

    /// Catalog REST API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Recipient of the release report
    #[arg(long, global = true)]
    email: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reconcile staging and the FTP area with the catalog")]
    Release(ReleaseArgs),
    #[command(about = "Move settled depositions into staging")]
    Deposit(DepositArgs),
    #[command(about = "Manage the harmonisation queue")]
    Queue(QueueArgs),
    #[command(about = "Show where a study lives")]
    Locate(LocateArgs),
    #[command(about = "Print the range bin of a study")]
    Bin(BinArgs),
}

#[derive(Args)]
struct ReleaseArgs {
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    no_email: bool,

    /// Re-release every authorised study, ignoring the release marker
    #[arg(long)]
    full: bool,
}

#[derive(Args)]
struct DepositArgs {
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct QueueArgs {
    #[command(subcommand)]
    command: QueueCommand,
}

#[derive(Subcommand)]
enum QueueCommand {
    #[command(about = "Rebuild the queue from the FTP area")]
    Rebuild,
    #[command(about = "Pick up changes since the last queue run")]
    Refresh,
    #[command(about = "Show queue counts")]
    Status,
    #[command(about = "Copy queued studies to the harmonisation area")]
    Release(QueueReleaseArgs),
    #[command(about = "Add or override queue records")]
    Add(AddArgs),
    #[command(about = "Put in-progress studies back in the queue")]
    Requeue(RequeueArgs),
    #[command(about = "List queue records")]
    List(ListArgs),
}

#[derive(Args)]
struct QueueReleaseArgs {
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long = "type")]
    types: Vec<HarmonisationType>,

    #[arg(long)]
    max_priority: Option<Priority>,

    /// Submit one batch job per released study; `{study}` is substituted
    #[arg(long)]
    submit: Option<String>,

    /// Wait for submitted jobs to finish
    #[arg(long, requires = "submit")]
    wait: bool,

    #[arg(long, default_value_t = 30)]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 200)]
    max_polls: u32,

    #[arg(long, default_value_t = 3)]
    max_resubmissions: u32,
}

#[derive(Args)]
struct AddArgs {
    #[arg(required = true)]
    studies: Vec<StudyAccession>,

    #[arg(long)]
    priority: Option<Priority>,

    #[arg(long = "type")]
    harmonisation_type: Option<HarmonisationType>,

    #[arg(long)]
    harmonised: bool,
}

#[derive(Args)]
struct RequeueArgs {
    #[arg(required = true)]
    studies: Vec<StudyAccession>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long = "type")]
    types: Vec<HarmonisationType>,

    #[arg(long)]
    harmonised: Option<bool>,

    #[arg(long)]
    in_progress: Option<bool>,

    #[arg(long)]
    max_priority: Option<Priority>,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct LocateArgs {
    study: StudyAccession,

    #[arg(long, value_enum, default_value = "ftp")]
    area: Area,
}

#[derive(Args)]
struct BinArgs {
    study: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::MalformedAccession(_)
        | SyncError::InvalidRangeBin(_)
        | SyncError::InvalidHarmonisationType(_)
        | SyncError::InvalidPriority(_)
        | SyncError::MissingConfig
        | SyncError::MissingSetting(_)
        | SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_) => 2,
        SyncError::CatalogHttp(_)
        | SyncError::CatalogStatus { .. }
        | SyncError::CatalogPayload(_)
        | SyncError::MissingTool(_)
        | SyncError::Transfer(_)
        | SyncError::Scheduler(_)
        | SyncError::Notify(_) => 3,
        SyncError::Store(_) => 4,
        SyncError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    if let Commands::Bin(args) = &cli.command {
        let bin = range_bin(&args.study)?;
        match output_mode {
            OutputMode::Json => JsonOutput::print_json(&serde_json::json!({
                "study": args.study.trim().to_uppercase(),
                "bin": bin,
            }))
            .into_diagnostic()?,
            OutputMode::Text => println!("{bin}"),
        }
        return Ok(());
    }

    let overrides = Overrides {
        staging_dir: cli.staging_dir,
        ftp_dir: cli.ftp_dir,
        harmonisation_dir: cli.harmonisation_dir,
        deposition_dir: cli.deposition_dir,
        queue_db: cli.queue_db,
        catalog_api_url: cli.api_url,
        email_recipient: cli.email,
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), &overrides)?;

    let transfer = config
        .rsync
        .clone()
        .map(RsyncTransfer::with_program)
        .unwrap_or_default();
    if !transfer.is_available() {
        tracing::warn!("rsync not found on PATH; transfers will fail");
    }
    let notifier = config
        .sendmail
        .clone()
        .map(SendmailNotifier::with_program)
        .unwrap_or_default();

    match cli.command {
        Commands::Release(args) => {
            let catalog = CatalogHttpClient::new(config.catalog_api_url()?, config.page_size)?;
            let app = App::new(config, catalog, transfer, notifier);
            run_release(&app, args, output_mode)
        }
        Commands::Deposit(args) => {
            let app = App::new(config, NoCatalog, transfer, NoopNotifier);
            let report = app.deposit(args.dry_run, sink_for(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_deposit(&report).into_diagnostic()?,
                OutputMode::Text => {
                    let verb = if report.dry_run { "would sync" } else { "synced" };
                    for study in &report.synced {
                        println!("{verb}\t{}\t{} -> {}", study.accession, study.source, study.destination);
                    }
                    for path in &report.too_recent {
                        println!("too recent\t{path}");
                    }
                    for failure in &report.failures {
                        println!("failed\t{}\t{}", failure.source, failure.message);
                    }
                }
            }
            Ok(())
        }
        Commands::Queue(args) => {
            let app = App::new(config, NoCatalog, transfer, NoopNotifier);
            run_queue(&app, args.command, output_mode)
        }
        Commands::Locate(args) => {
            let app = App::new(config, NoCatalog, transfer, NoopNotifier);
            let result = app.locate(&args.study, args.area)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_locate(&result).into_diagnostic()?,
                OutputMode::Text => match &result.found_at {
                    Some(path) => println!("{path}"),
                    None => println!("{} not found (expected at {})", result.study, result.canonical_path),
                },
            }
            Ok(())
        }
        Commands::Bin(_) => Ok(()),
    }
}

fn sink_for(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TracingSink,
    }
}

fn run_release<C: CatalogClient, T: Transfer, N: Notifier>(
    app: &App<C, T, N>,
    args: ReleaseArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let report = app.release(
        &ReleaseRunOptions {
            dry_run: args.dry_run,
            no_email: args.no_email,
            full: args.full,
        },
        sink_for(output_mode),
    )?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_release(&report).into_diagnostic()?,
        OutputMode::Text => print!("{}", report.render_text()),
    }
    Ok(())
}

fn run_queue<C: CatalogClient, T: Transfer, N: Notifier>(
    app: &App<C, T, N>,
    command: QueueCommand,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let report = match command {
        QueueCommand::Rebuild => app.queuer()?.rebuild()?,
        QueueCommand::Refresh => app.queuer()?.refresh()?,
        QueueCommand::Status => {
            let summary = app.queuer()?.summary()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
                OutputMode::Text => {
                    println!("total\t{}", summary.total);
                    println!("queued\t{}", summary.queued);
                    println!("in_progress\t{}", summary.in_progress);
                    println!("harmonised\t{}", summary.harmonised);
                    println!("skipped\t{}", summary.skipped);
                    match summary.last_run {
                        Some(ts) => println!("last_run\t{}", ts.to_rfc3339()),
                        None => println!("last_run\tnever"),
                    }
                }
            }
            return Ok(());
        }
        QueueCommand::List(args) => {
            let filter = QueueFilter {
                harmonised: args.harmonised,
                harmonisation_types: (!args.types.is_empty()).then_some(args.types),
                in_progress: args.in_progress,
                max_priority: args.max_priority,
                limit: args.limit,
                ..QueueFilter::default()
            };
            let records = app.queuer()?.list(&filter)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_records(&records).into_diagnostic()?,
                OutputMode::Text => records.iter().for_each(|record| println!("{}", record_line(record))),
            }
            return Ok(());
        }
        QueueCommand::Release(args) => {
            let mut filter = QueueFilter::pending();
            if !args.types.is_empty() {
                filter.harmonisation_types = Some(args.types);
            }
            filter.max_priority = args.max_priority;
            let submit = args.submit.map(|command| {
                let options = SubmitOptions {
                    command,
                    wait: args.wait.then(|| PollPolicy {
                        interval: Duration::from_secs(args.poll_interval_secs),
                        max_attempts: args.max_polls,
                        ..PollPolicy::default()
                    }),
                    max_resubmissions: args.max_resubmissions,
                };
                (LsfScheduler::new(app.config().lsf.clone()), options)
            });
            let result = app.queue_release(&filter, args.limit, submit, sink_for(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_queue_release(&result).into_diagnostic()?,
                OutputMode::Text => {
                    print_queue_report(&result.queue);
                    for job in &result.jobs {
                        println!("job\t{}\t{}\t{}", job.id, job.spec.name, job.status);
                    }
                    if let Some(poll) = result.poll {
                        println!("poll\t{poll:?}");
                    }
                }
            }
            return Ok(());
        }
        QueueCommand::Add(args) => app.queuer()?.add(
            &args.studies,
            &AddOptions {
                priority: args.priority,
                harmonisation_type: args.harmonisation_type,
                harmonised: args.harmonised.then_some(true),
            },
        )?,
        QueueCommand::Requeue(args) => app.queuer()?.requeue(&args.studies)?,
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_queue(&report).into_diagnostic()?,
        OutputMode::Text => print_queue_report(&report),
    }
    Ok(())
}

fn print_queue_report(report: &QueueReport) {
    println!("{}", queue_report_line(report));
    for failure in &report.failures {
        println!("failed\t{}\t{}", failure.study, failure.message);
    }
}
