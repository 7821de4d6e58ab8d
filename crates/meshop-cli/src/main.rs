//! meshop CLI - installs, upgrades and reconciles an Istio control plane

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

mod commands;
mod display;
mod error;
mod exit_codes;
mod logging;

use error::Result;

#[derive(Parser)]
#[command(name = "meshop")]
#[command(author = "meshop Contributors")]
#[command(version)]
#[command(about = "Installs, upgrades and reconciles an Istio control plane", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Path to the kubeconfig file
    #[arg(long, global = true, env = "MESHOP_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true, env = "MESHOP_CONTEXT")]
    context: Option<String>,
}

/// Where the cluster lives
#[derive(Debug, Clone)]
pub struct ClusterArgs {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

/// Overlay and chart inputs shared by the commands that render
#[derive(Args, Debug, Clone)]
pub struct SpecArgs {
    /// Control plane spec overlay file
    #[arg(short = 'f', long = "filename")]
    pub filename: Option<PathBuf>,

    /// Override a spec value (path=value)
    #[arg(short = 's', long = "set")]
    pub set: Vec<String>,

    /// Install package directory with the component charts, used when the spec
    /// sets no installPackagePath
    #[arg(long, env = "MESHOP_CHARTS")]
    pub charts: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, apply or compare control plane manifests
    #[command(subcommand)]
    Manifest(ManifestCommands),

    /// Upgrade a running control plane to this operator's version
    Upgrade {
        #[command(flatten)]
        spec: SpecArgs,

        /// URI of the versions compatibility map
        #[arg(short = 'u', long = "versionsURI", default_value = meshop_kube::versions::DEFAULT_VERSIONS_URL)]
        versions_uri: String,

        /// Do not ask before changing values
        #[arg(long)]
        skip_confirmation: bool,

        /// Wait until every control plane pod runs the target version
        #[arg(short, long)]
        wait: bool,

        /// Skip version and compatibility checks
        #[arg(long)]
        force: bool,

        /// Render and send everything as a dry run
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect the builtin profiles
    #[command(subcommand)]
    Profile(ProfileCommands),

    /// Reconcile one control plane resource until interrupted
    Operator {
        /// Namespace of the control plane resource
        #[arg(long, default_value = "istio-operator")]
        namespace: String,

        /// Name of the control plane resource
        #[arg(long)]
        name: String,

        /// Time between reconcile passes
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        interval: Duration,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,

        /// Wait for workloads to become ready on each pass
        #[arg(long)]
        wait: bool,

        /// Install package directory with the component charts
        #[arg(long, env = "MESHOP_CHARTS")]
        charts: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ManifestCommands {
    /// Render the manifests without touching the cluster
    Generate {
        #[command(flatten)]
        spec: SpecArgs,

        /// Write one file per component into this directory
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Render the manifests and apply them to the cluster
    Apply {
        #[command(flatten)]
        spec: SpecArgs,

        /// Send every request as a dry run
        #[arg(long)]
        dry_run: bool,

        /// Print the applied manifest of each component
        #[arg(long)]
        verbose: bool,

        /// Wait for workloads to become ready
        #[arg(short, long)]
        wait: bool,

        /// Maximum time to wait for readiness
        #[arg(long, default_value = "300s", value_parser = humantime::parse_duration)]
        readiness_timeout: Duration,
    },

    /// Compare manifests from two files or directories
    Diff {
        a: PathBuf,
        b: PathBuf,

        /// Read all .yaml/.yml files below the directories
        #[arg(short = 'r', long = "directory")]
        recursive: bool,

        /// Objects to compare, as kind:namespace:name[,...]
        #[arg(long, conflicts_with = "ignore")]
        select: Option<String>,

        /// Objects to leave out, as kind:namespace:name[,...]
        #[arg(long)]
        ignore: Option<String>,

        /// Field paths to leave out of the comparison, as globs
        #[arg(long, value_delimiter = ',')]
        ignore_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List builtin profiles and the versions this operator supports
    List {
        /// URI of the versions compatibility map
        #[arg(short = 'u', long = "versionsURI", default_value = meshop_kube::versions::DEFAULT_VERSIONS_URL)]
        versions_uri: String,
    },

    /// Print a merged profile
    Dump {
        /// Profile name, overriding the one in the overlay
        profile: Option<String>,

        /// Control plane spec overlay file
        #[arg(short = 'f', long = "filename")]
        filename: Option<PathBuf>,

        /// Override a spec value (path=value)
        #[arg(short = 's', long = "set")]
        set: Vec<String>,

        /// Only print the subtree at this path, e.g. trafficManagement.components.pilot
        #[arg(short = 'p', long)]
        config_path: Option<String>,

        /// Print the chart values the spec translates to instead
        #[arg(long)]
        helm_values: bool,
    },
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    logging::init(cli.debug);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(exit_codes::ERROR);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let cluster = ClusterArgs {
        kubeconfig: cli.kubeconfig,
        context: cli.context,
    };

    match cli.command {
        Commands::Manifest(ManifestCommands::Generate { spec, output }) => {
            commands::manifest::generate(&spec, output.as_deref())?;
        }

        Commands::Manifest(ManifestCommands::Apply {
            spec,
            dry_run,
            verbose,
            wait,
            readiness_timeout,
        }) => {
            commands::manifest::apply(&spec, &cluster, dry_run, verbose, wait, readiness_timeout).await?;
        }

        Commands::Manifest(ManifestCommands::Diff {
            a,
            b,
            recursive,
            select,
            ignore,
            ignore_paths,
        }) => {
            let opts = meshop_kube::DiffOptions {
                select,
                ignore,
                ignore_paths,
            };
            if !commands::manifest::diff(&a, &b, recursive, &opts)? {
                return Ok(exit_codes::DIFFERENCES);
            }
        }

        Commands::Upgrade {
            spec,
            versions_uri,
            skip_confirmation,
            wait,
            force,
            dry_run,
        } => {
            let opts = meshop_kube::UpgradeOptions {
                versions_uri,
                skip_confirmation,
                wait,
                force,
                dry_run,
                ..Default::default()
            };
            commands::upgrade::run(&spec, &cluster, opts).await?;
        }

        Commands::Profile(ProfileCommands::List { versions_uri }) => {
            commands::profile::list(&versions_uri).await?;
        }

        Commands::Profile(ProfileCommands::Dump {
            profile,
            filename,
            set,
            config_path,
            helm_values,
        }) => {
            commands::profile::dump(
                profile.as_deref(),
                filename.as_deref(),
                &set,
                config_path.as_deref(),
                helm_values,
            )?;
        }

        Commands::Operator {
            namespace,
            name,
            interval,
            once,
            wait,
            charts,
        } => {
            commands::operator::run(&cluster, charts.as_deref(), &namespace, &name, interval, once, wait).await?;
        }
    }
    Ok(exit_codes::SUCCESS)
}
