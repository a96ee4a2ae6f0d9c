use anyhow::Context;
use clap::{Parser, Subcommand};
use forest_batch::app::{handle_fatal_error, init_logging, AppConfig};
use forest_batch::config::{BatchConfig, ConfigLoader};
use forest_batch::job::{BatchJobRunner, JobReport};
use forest_batch::model::naming::{job_folder_name, new_job_guid, JOB_FOLDER_PREFIX};
use forest_batch::model::JobParameters;
use forest_batch::pipeline::EchoProjection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

const DEFAULT_PROJECTION_PARAMETERS: &str = r#"{"outputFormat":"CSV_YIELD_TABLE","selectedExecutionOptions":["DoEnableProgressLogging","DoEnableErrorLogging"]}"#;

/// Partitioned batch runner for forest inventory projections
#[derive(Parser)]
#[command(name = "forest-batch")]
#[command(about = "Split polygon/layer inventories into partitions, project them and merge the results", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML batch configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one batch job over a polygon and a layer CSV file
    Run {
        /// Polygon CSV file, keyed by feature id
        #[arg(long)]
        polygons: PathBuf,

        /// Layer CSV file, keyed by feature id
        #[arg(long)]
        layers: PathBuf,

        /// Number of partitions (default: partitioning.grid_size)
        #[arg(short = 'p', long)]
        partitions: Option<i64>,

        /// Records per chunk (default: partitioning.chunk_size)
        #[arg(long)]
        chunk_size: Option<i64>,

        /// Directory the job folder is created in (default: current directory)
        #[arg(short = 'o', long)]
        output_root: Option<PathBuf>,

        /// Job guid (default: a new random guid)
        #[arg(long)]
        job_guid: Option<String>,

        /// Projection parameters as a JSON object
        #[arg(long, conflicts_with = "parameters_file")]
        parameters: Option<String>,

        /// File containing the projection parameters JSON
        #[arg(long)]
        parameters_file: Option<PathBuf>,
    },
    /// Print the effective batch configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app_config = match AppConfig::new(cli.verbose) {
        Ok(config) => config.with_config_file(cli.config.clone()),
        Err(e) => handle_fatal_error(e, cli.verbose),
    };
    init_logging(&app_config);

    let result = match cli.command {
        Commands::Run {
            polygons,
            layers,
            partitions,
            chunk_size,
            output_root,
            job_guid,
            parameters,
            parameters_file,
        } => {
            run_job(
                &app_config,
                RunArgs {
                    polygons,
                    layers,
                    partitions,
                    chunk_size,
                    output_root,
                    job_guid,
                    parameters,
                    parameters_file,
                },
            )
            .await
        }
        Commands::Config => print_config(&app_config).await,
    };

    if let Err(e) = result {
        handle_fatal_error(e, app_config.verbose);
    }
}

struct RunArgs {
    polygons: PathBuf,
    layers: PathBuf,
    partitions: Option<i64>,
    chunk_size: Option<i64>,
    output_root: Option<PathBuf>,
    job_guid: Option<String>,
    parameters: Option<String>,
    parameters_file: Option<PathBuf>,
}

async fn load_config(app_config: &AppConfig) -> anyhow::Result<BatchConfig> {
    Ok(ConfigLoader::load(app_config.config_file.as_deref()).await?)
}

async fn run_job(app_config: &AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(app_config).await?;

    for input in [&args.polygons, &args.layers] {
        if !input.is_file() {
            anyhow::bail!("Input file not found: {}", input.display());
        }
    }

    let projection_parameters = match (args.parameters, args.parameters_file) {
        (Some(json), _) => json,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read projection parameters from {}", path.display()))?,
        (None, None) => DEFAULT_PROJECTION_PARAMETERS.to_string(),
    };

    let job_guid = args.job_guid.unwrap_or_else(new_job_guid);
    let output_root = args
        .output_root
        .unwrap_or_else(|| app_config.working_dir.clone());
    let job_base_dir = output_root.join(job_folder_name(JOB_FOLDER_PREFIX, &job_guid));

    let mut params = JobParameters::new(&job_guid, &job_base_dir)
        .with_projection_parameters(projection_parameters);
    params.partition_count = args.partitions;
    params.chunk_size = args.chunk_size;

    let job_execution_id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    debug!("Running job {} as execution {}", job_guid, job_execution_id);

    let runner = BatchJobRunner::new(config, Arc::new(EchoProjection::new()));
    let report = runner
        .run(job_execution_id, &params, args.polygons, args.layers)
        .await?;

    print_report(&report);
    if !report.is_success() {
        anyhow::bail!(
            "Job {} finished with status {}",
            report.job_guid,
            report.exit_status
        );
    }
    info!("Results written to {}", report.archive_path.display());
    Ok(())
}

fn print_report(report: &JobReport) {
    println!("Job {} ({})", report.job_guid, report.exit_status);
    println!(
        "  feature ids: {} across {} partitions",
        report.partition_summary.total_feature_ids, report.totals.partitions
    );
    println!(
        "  read: {}, written: {}, skipped: {}, failed partitions: {}",
        report.totals.read, report.totals.written, report.totals.skipped, report.totals.failed
    );
    for (partition, error) in report.partition_errors() {
        println!("  {}: {}", partition, error);
    }
    let validity = if report.archive_valid { "valid" } else { "INVALID" };
    println!("  archive: {} ({})", report.archive_path.display(), validity);
}

async fn print_config(app_config: &AppConfig) -> anyhow::Result<()> {
    let config = load_config(app_config).await?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
