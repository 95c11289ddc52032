//! WolfReplica - Read Replica Admission Manager
//!
//! Adds standalone MySQL instances to a replicated cluster as
//! asynchronous read replicas.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfreplica::admission::{
    AdmissionOptions, AdmissionReport, ReplicaAdmission, RollbackStatus, SyncOutcome,
};
use wolfreplica::config::WolfReplicaConfig;
use wolfreplica::error::{Error, Result};
use wolfreplica::metadata::{MetadataStore, SqliteMetadataStore};
use wolfreplica::node::{MySqlConnector, NodeConnector};
use wolfreplica::report::ConsoleReporter;
use wolfreplica::topology::{ClusterMember, ClusterPolicy, InstanceType};

/// WolfReplica - Read Replica Admission Manager
#[derive(Parser)]
#[command(name = "wolfreplica")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfreplica.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an instance to a cluster as a read replica
    Admit(AdmitArgs),

    /// Run every admission check without changing anything
    Check {
        /// Cluster name
        #[arg(long)]
        cluster: String,

        /// Instance to check (host:port)
        #[arg(long)]
        target: String,

        /// Replication sources: primary, secondary or ADDR[*WEIGHT],...
        #[arg(long, default_value = "primary")]
        sources: String,
    },

    /// Record an existing replication group in the metadata store
    Register(RegisterArgs),

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfreplica.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[derive(Args)]
struct AdmitArgs {
    /// Cluster name
    #[arg(long)]
    cluster: String,

    /// Instance to add (host:port)
    #[arg(long)]
    target: String,

    /// Replication sources: primary, secondary or ADDR[*WEIGHT],...
    #[arg(long, default_value = "primary")]
    sources: String,

    /// Recovery method (auto, clone, incremental)
    #[arg(long, default_value = "auto")]
    recovery: String,

    /// Clone donor (requires --recovery clone)
    #[arg(long)]
    donor: Option<String>,

    /// Clone progress reporting (none, text)
    #[arg(long, default_value = "text")]
    progress: String,

    /// Seconds to wait for the replica to catch up (0 = don't wait)
    #[arg(long)]
    timeout: Option<u64>,

    /// Label recorded for the replica
    #[arg(long)]
    label: Option<String>,

    /// Validate and print the plan only
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct RegisterArgs {
    /// Cluster name
    #[arg(long)]
    cluster: String,

    /// Group replication group name
    #[arg(long)]
    group_name: String,

    /// Current primary (host:port)
    #[arg(long)]
    primary: String,

    /// Secondary member (host:port); repeat for each
    #[arg(long)]
    secondary: Vec<String>,

    /// Cluster sslMode
    #[arg(long, default_value = "REQUIRED")]
    ssl_mode: String,

    /// Cluster memberAuthType
    #[arg(long, default_value = "PASSWORD")]
    auth_type: String,

    /// The group's GTID set contains every transaction ever applied
    #[arg(long)]
    gtid_complete: bool,

    /// Disable clone-based provisioning
    #[arg(long)]
    disable_clone: bool,

    /// Cluster set the cluster belongs to
    #[arg(long)]
    cluster_set: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_validate(cli.config)
        }
        command => {
            let config = match WolfReplicaConfig::from_file(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Failed to load configuration from {:?}: {}", cli.config, e);
                    eprintln!("Create one with: wolfreplica init --output {}", cli.config.display());
                    return Err(e);
                }
            };
            let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
            init_logging(level, &config.logging.format);

            match command {
                Commands::Admit(args) => run_admit(config, args).await,
                Commands::Check { cluster, target, sources } => {
                    let args = AdmitArgs {
                        cluster,
                        target,
                        sources,
                        recovery: "auto".to_string(),
                        donor: None,
                        progress: "none".to_string(),
                        timeout: None,
                        label: None,
                        dry_run: true,
                    };
                    run_admit(config, args).await
                }
                Commands::Register(args) => run_register(config, args).await,
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Admit (or, with --dry-run, check) a read replica
async fn run_admit(config: WolfReplicaConfig, args: AdmitArgs) -> Result<()> {
    let store = Arc::new(SqliteMetadataStore::open(&config.metadata.path)?);
    let cluster = store.cluster_by_name(&args.cluster).await?.ok_or_else(|| {
        Error::Config(format!(
            "Cluster '{}' is not registered in {}",
            args.cluster,
            config.metadata.path.display()
        ))
    })?;

    let options = AdmissionOptions {
        sources: args.sources.parse()?,
        recovery: args.recovery.parse()?,
        donor: args.donor,
        timeout: args.timeout.map(Duration::from_secs),
        dry_run: args.dry_run,
        label: args.label,
        recovery_progress: args.progress.parse()?,
    };

    let connector = Arc::new(MySqlConnector::new(config.credentials.clone()));
    let reporter = Arc::new(ConsoleReporter::new(true));
    let admission = ReplicaAdmission::new(connector, store, reporter, config.admission_settings());

    // Set up Ctrl+C handler
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        token.cancel();
    })
    .map_err(|e| Error::Internal(format!("Failed to install Ctrl+C handler: {}", e)))?;

    match admission.admit_replica(&args.target, &cluster, &options, &cancel).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(failure) => {
            eprintln!();
            eprintln!("✗ {}", failure.error);
            if let Some(hint) = failure.error.hint() {
                eprintln!("  {}", hint);
            }
            if failure.rollback == RollbackStatus::Incomplete {
                eprintln!("  Some changes could not be reverted and need manual cleanup:");
                for (name, reason) in failure.unwind.iter().flat_map(|u| u.failed.iter()) {
                    eprintln!("    - {}: {}", name, reason);
                }
            }
            Err(failure.error)
        }
    }
}

fn print_report(report: &AdmissionReport) {
    let plan = &report.plan;
    println!();
    if report.dry_run {
        println!("✓ Instance '{}' can be added as a read replica", plan.target);
    } else {
        println!("✓ Instance '{}' was added as a read replica", plan.target);
    }
    println!("  Server UUID:    {}", plan.target_identity.server_uuid);
    println!("  Donor:          {}", plan.donor.address);
    println!("  Sources:        {}", plan.sources);
    println!("  Recovery:       {}", plan.recovery);
    if plan.rejoin {
        println!("  Rejoin:         yes");
    }
    if !report.dry_run {
        let sync = match report.sync {
            SyncOutcome::Synchronized => "synchronized",
            SyncOutcome::Skipped => "not waited for",
            SyncOutcome::TimedOut => "still catching up",
        };
        println!("  Sync:           {}", sync);
    }
}

/// Record an existing group in the metadata store
async fn run_register(config: WolfReplicaConfig, args: RegisterArgs) -> Result<()> {
    let store = SqliteMetadataStore::open(&config.metadata.path)?;
    if store.cluster_by_name(&args.cluster).await?.is_some() {
        return Err(Error::Config(format!("Cluster '{}' is already registered", args.cluster)));
    }

    let policy = ClusterPolicy {
        ssl_mode: args.ssl_mode.parse()?,
        auth_type: args.auth_type.parse()?,
        gtid_set_is_complete: args.gtid_complete,
        disable_clone: args.disable_clone,
    };

    // Read every identity first so an unreachable member leaves no trace
    let connector = MySqlConnector::new(config.credentials.clone());
    let mut identities = Vec::with_capacity(args.secondary.len() + 1);
    for address in std::iter::once(&args.primary).chain(args.secondary.iter()) {
        let session = connector.connect(address).await?;
        let identity = session.identity().await?;
        tracing::info!("{} is {} (server_id {}, {})", address, identity.server_uuid, identity.server_id, identity.version);
        identities.push(identity);
    }

    let primary = identities[0].canonical_address.clone();
    let members = identities
        .into_iter()
        .map(|identity| ClusterMember {
            server_uuid: identity.server_uuid,
            server_id: identity.server_id,
            address: identity.canonical_address,
            instance_type: InstanceType::GroupMember,
            version: Some(identity.version),
            label: None,
        })
        .collect();
    let cluster_id = store
        .register_cluster(
            &args.cluster,
            &args.group_name,
            &primary,
            &policy,
            args.cluster_set.as_deref(),
            members,
        )
        .await?;

    println!("✓ Cluster '{}' registered ({})", args.cluster, cluster_id);
    println!("  Primary:        {}", primary);
    println!("  Members:        {}", args.secondary.len() + 1);
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    let config_content = r#"# WolfReplica Configuration
# Generated configuration file

[metadata]
path = "/var/lib/wolfreplica/metadata.db"

[credentials]
user = "clusteradmin"
password = "changeme"
connect_timeout_secs = 10

[admission]
sync_timeout_secs = 300
poll_interval_ms = 500
restart_timeout_secs = 300
# fail, clone, incremental or prompt
ambiguous_recovery = "fail"

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to set the administrative credentials.");
    println!("Then register a cluster with: wolfreplica --config {} register --cluster NAME ...", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfReplicaConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Metadata:           {}", config.metadata.path.display());
            println!("  User:               {}", config.credentials.user);
            println!("  Sync Timeout:       {} s", config.admission.sync_timeout_secs);
            println!("  Ambiguous Recovery: {:?}", config.admission.ambiguous_recovery);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
