use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use catalog_harvester::app::Harvester;
use catalog_harvester::config::ConfigLoader;
use catalog_harvester::error::HarvestError;
use catalog_harvester::fetch::HttpFetcher;
use catalog_harvester::output::{JsonOutput, OutputMode, TextOutput};
use catalog_harvester::store::Store;

const TOKEN_ENV: &str = "DDW_TOKEN";

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Batch harvester for open-data catalogs")]
#[command(version, author)]
struct Cli {
    /// Path to the JSON config file (defaults to ./harvest.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON summaries
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Harvest CKAN instances")]
    Ckan(CkanArgs),
    #[command(about = "Mirror the object store and fetch dataset metadata")]
    Mirror,
    #[command(about = "Fetch metadata and tags of the datasets linked from a project")]
    Project(ProjectArgs),
    #[command(about = "Collect tags from harvested metadata into tags_dict.json")]
    Tags(TagsArgs),
    #[command(about = "Move tagged datasets under labeled/")]
    Partition(TreeArgs),
    #[command(about = "Build the dataset-by-tag target matrix")]
    Matrix(TreeArgs),
}

#[derive(Args)]
struct CkanArgs {
    /// Configured instance name; all instances when omitted
    #[arg(long, conflicts_with = "url")]
    instance: Option<String>,

    /// Harvest an unconfigured instance by base URL
    #[arg(long, requires = "name")]
    url: Option<String>,

    /// Directory name for --url
    #[arg(long)]
    name: Option<String>,

    /// Only read the first listing page of each instance and report failures
    #[arg(long)]
    check: bool,
}

#[derive(Args)]
struct ProjectArgs {
    /// Project owner account
    owner: String,

    /// Project id
    project: String,
}

#[derive(Args)]
struct TreeArgs {
    /// Harvest tree to read; defaults to the mirror directory under data_dir,
    /// or its labeled/ partition once that exists (partition always uses the
    /// mirror directory)
    #[arg(long)]
    dir: Option<String>,
}

#[derive(Args)]
struct TagsArgs {
    #[command(flatten)]
    tree: TreeArgs,

    /// Number of most frequent tags to report
    #[arg(long, default_value_t = 25)]
    top: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::UnknownInstance(_)
        | HarvestError::MissingConfig(_) => 2,
        HarvestError::CatalogHttp(_)
        | HarvestError::CatalogStatus { .. }
        | HarvestError::ObjectStoreHttp(_)
        | HarvestError::Http(_)
        | HarvestError::Status { .. }
        | HarvestError::RetriesExhausted { .. } => 3,
        HarvestError::StructuralViolation { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if config.dataset_api.token.is_none() {
        config.dataset_api.token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty());
    }
    let harvester = Harvester::new(config);

    match cli.command {
        Commands::Ckan(args) => run_ckan(args, &harvester, output_mode),
        Commands::Mirror => {
            let result = harvester.harvest_object_store()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_mirror(&result),
                OutputMode::Text => TextOutput::print_mirror(&result),
            }
            .into_diagnostic()
        }
        Commands::Project(args) => {
            let api = harvester.dataset_api()?;
            let result = harvester.harvest_project(&api, &args.owner, &args.project)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_project(&result),
                OutputMode::Text => TextOutput::print_project(&result),
            }
            .into_diagnostic()
        }
        Commands::Tags(args) => {
            let store = tree_store(&args.tree, &harvester);
            let summary = harvester.collect_tags(&store, args.top)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_tags(&summary),
                OutputMode::Text => TextOutput::print_tags(&summary),
            }
            .into_diagnostic()
        }
        Commands::Partition(args) => {
            let store = args
                .dir
                .map(Store::new)
                .unwrap_or_else(|| harvester.mirror_store());
            let summary = harvester.partition(&store)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_partition(&summary),
                OutputMode::Text => TextOutput::print_partition(&summary),
            }
            .into_diagnostic()
        }
        Commands::Matrix(args) => {
            let store = tree_store(&args, &harvester);
            let summary = harvester.build_matrix(&store)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_matrix(&summary),
                OutputMode::Text => TextOutput::print_matrix(&summary),
            }
            .into_diagnostic()
        }
    }
}

fn run_ckan(args: CkanArgs, harvester: &Harvester, output_mode: OutputMode) -> miette::Result<()> {
    if args.check {
        let checks = match (args.url, args.name) {
            (Some(url), Some(name)) => vec![harvester.check_ckan_url(&name, &url)?],
            _ => harvester.check_ckan_instances(args.instance.as_deref())?,
        };
        match output_mode {
            OutputMode::Json => JsonOutput::print_checks(&checks),
            OutputMode::Text => TextOutput::print_checks(&checks),
        }
        .into_diagnostic()?;
        let failing = checks.iter().filter(|check| !check.ok).count();
        if failing > 0 {
            return Err(HarvestError::CatalogHttp(format!(
                "{failing} of {} instances unreachable",
                checks.len()
            ))
            .into());
        }
        return Ok(());
    }

    let results = match (args.url, args.name) {
        (Some(url), Some(name)) => {
            let config = harvester.config();
            let fetcher = HttpFetcher::new(config.retry, config.timeout)?;
            vec![harvester.harvest_ckan_url(&name, &url, fetcher)?]
        }
        _ => harvester.harvest_ckan(args.instance.as_deref())?,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_catalogs(&results),
        OutputMode::Text => TextOutput::print_catalogs(&results),
    }
    .into_diagnostic()
}

fn tree_store(args: &TreeArgs, harvester: &Harvester) -> Store {
    match &args.dir {
        Some(dir) => Store::new(dir.as_str()),
        None => harvester.labeled_tree(),
    }
}
