use std::{io::Write, path::PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::{
    config::{KubeConfigOptions, Kubeconfig as KubeKubeconfig},
    Client, Config,
};
use tracing_subscriber::EnvFilter;

use kindred::{
    provision::{DEFAULT_CONTROL_PLANE_POD, DEFAULT_SYSTEM_NAMESPACE, MAX_ALLOCATION_ATTEMPTS},
    HostCredentials, KubeCluster, Kubeconfig, ProvisionConfig, Provisioner, RandomAllocator,
    TenantId,
};

#[derive(Debug, Parser)]
#[clap(
    name = "kindred",
    about = "Run tenant Kubernetes control planes inside an existing cluster"
)]
struct Cli {
    #[clap(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    log_level: String,

    #[clap(long, value_enum, default_value = "plain", global = true)]
    log_format: LogFormat,

    #[clap(flatten)]
    cluster: ClusterArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

/// Selects the host cluster and the credentials shared with new tenants.
#[derive(Debug, Args)]
struct ClusterArgs {
    /// Kubeconfig file to use instead of $KUBECONFIG or ~/.kube/config
    #[clap(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[clap(long, global = true)]
    context: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Commands for configuring tenant Kubernetes inside of a cluster
    #[clap(subcommand)]
    Tenant(TenantCommand),
}

#[derive(Debug, Subcommand)]
enum TenantCommand {
    /// Create and configure a new Kube API Server and Controller Manager
    Create(CreateArgs),

    /// List tenant Kubernetes instances in the cluster
    List,

    /// Print the kubeconfig for a tenant Kubernetes cluster
    Config {
        /// Tenant identifier printed by `create`
        id: String,
    },
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Seed for identifier and port allocation
    #[clap(long)]
    seed: Option<u64>,

    /// Host API server pod whose node address the tenant API server uses
    #[clap(long, default_value = DEFAULT_CONTROL_PLANE_POD)]
    control_plane_pod: String,

    /// Namespace of the host API server pod
    #[clap(long, default_value = DEFAULT_SYSTEM_NAMESPACE)]
    system_namespace: String,

    /// Leave already-created objects in place if a later step fails
    #[clap(long)]
    keep_on_failure: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let Cli {
        log_level,
        log_format,
        cluster,
        command,
    } = Cli::parse();

    init_tracing(&log_level, log_format)?;

    let result = match command {
        Command::Tenant(TenantCommand::Create(args)) => create(&cluster, args).await,
        Command::Tenant(TenantCommand::List) => list(&cluster).await,
        Command::Tenant(TenantCommand::Config { id }) => config(&cluster, &id).await,
    };
    if let Err(error) = &result {
        if error
            .downcast_ref::<kindred::Error>()
            .is_some_and(kindred::Error::is_transient)
        {
            tracing::warn!("The failure looks temporary; running the command again may succeed");
        }
    }
    result
}

// Logs go to stderr; stdout carries tables and kubeconfigs.
fn init_tracing(log_level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level {log_level:?}"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

async fn connect(args: &ClusterArgs) -> anyhow::Result<(KubeCluster, KubeKubeconfig)> {
    let kubeconfig = match &args.kubeconfig {
        Some(path) => KubeKubeconfig::read_from(path)
            .with_context(|| format!("failed to read kubeconfig {}", path.display()))?,
        None => KubeKubeconfig::read().context("failed to read kubeconfig")?,
    };
    let options = KubeConfigOptions {
        context: args.context.clone(),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
        .await
        .context("failed to load cluster configuration")?;
    let client = Client::try_from(config).context("failed to create Kubernetes client")?;
    Ok((KubeCluster::new(client), kubeconfig))
}

async fn create(cluster_args: &ClusterArgs, args: CreateArgs) -> anyhow::Result<()> {
    let (cluster, kubeconfig) = connect(cluster_args).await?;
    let kubeconfig = Kubeconfig::from_kube(&kubeconfig)?;
    let credentials = HostCredentials::from_kubeconfig(&kubeconfig, cluster_args.context.as_deref())
        .context("failed to resolve credentials to share with the tenant")?;

    let mut allocator = match args.seed {
        Some(seed) => RandomAllocator::from_seed(seed),
        None => RandomAllocator::from_entropy(),
    };
    let config = ProvisionConfig {
        control_plane_pod: args.control_plane_pod,
        system_namespace: args.system_namespace,
        keep_on_failure: args.keep_on_failure,
        max_allocation_attempts: MAX_ALLOCATION_ATTEMPTS,
    };

    let tenant = Provisioner::new(&cluster, credentials, config)
        .create(&mut allocator)
        .await
        .context("failed to create tenant")?;

    println!(
        "Done! Run...\n\n    kindred tenant config {}\n\n...to access your tenant cluster at {}",
        tenant.id, tenant.server_url
    );
    Ok(())
}

async fn list(cluster_args: &ClusterArgs) -> anyhow::Result<()> {
    let (cluster, _) = connect(cluster_args).await?;
    let tenants = kindred::list_tenants(&cluster)
        .await
        .context("failed to list tenants")?;
    print!("{}", kindred::render_table(&tenants));
    Ok(())
}

async fn config(cluster_args: &ClusterArgs, id: &str) -> anyhow::Result<()> {
    let id: TenantId = id.parse()?;
    let (cluster, _) = connect(cluster_args).await?;
    let kubeconfig = kindred::fetch_kubeconfig(&cluster, &id)
        .await
        .with_context(|| format!("failed to get kubeconfig for tenant {id}"))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&kubeconfig)?;
    stdout.flush()?;
    Ok(())
}
