//! propagate-controller - inspect and dry-run field-scoped propagation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use propagate_controller::cluster::{ApplyOptions, Cluster, GroupVersionKind, InMemoryCluster, Object};
use propagate_controller::config::{load_schemas, Config};
use propagate_controller::propagate::{extract, Identity, ManagerSelector, Materializer, MirrorRegistry};
use propagate_controller::schema::SchemaRegistry;
use propagate_controller::typed::TypedValue;
use propagate_controller::value;

#[derive(Parser, Debug)]
#[command(name = "propagate-controller", version)]
#[command(about = "Field-scoped propagation between a tenant and a host cluster")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", value_name = "FILTER")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a configuration file
    CheckConfig {
        file: PathBuf,

        /// Host namespace when the file does not set one
        #[arg(long, env = "POD_NAMESPACE")]
        host_namespace: Option<String>,
    },

    /// Print the part of an object owned by the selected managers
    Extract {
        object: PathBuf,

        /// Only this manager's fields
        #[arg(long, conflicts_with = "exclude_manager")]
        manager: Option<String>,

        /// Everyone's fields but these managers'
        #[arg(long, value_name = "MANAGER")]
        exclude_manager: Vec<String>,

        /// Kind as group/version/Kind; defaults to the object's own
        #[arg(long)]
        kind: Option<GroupVersionKind>,

        /// Configuration whose schemas describe the object's kind
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the field set of an object as fieldsV1 JSON
    Fieldset {
        object: PathBuf,

        #[arg(long)]
        kind: Option<GroupVersionKind>,

        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Build the host mirror of a tenant object against an in-memory host
    Materialize {
        object: PathBuf,

        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Manager the object is applied as when it has no managedFields
        #[arg(long, default_value = "user")]
        as_manager: String,

        #[arg(long, env = "POD_NAMESPACE")]
        host_namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid --log-level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::CheckConfig { file, host_namespace } => {
            let config = load_config(&file, host_namespace)?;
            config
                .build_registry(base_dir(&file))
                .with_context(|| format!("loading schemas of {}", file.display()))?;
            println!(
                "{}: ok ({} targets, host namespace {})",
                file.display(),
                config.targets.len(),
                config.host_namespace
            );
        }
        Command::Extract {
            object,
            manager,
            exclude_manager,
            kind,
            config,
        } => {
            let object = read_object(&object)?;
            let gvk = kind_of(&object, kind)?;
            let select = match manager {
                Some(manager) => ManagerSelector::Only(manager),
                None if exclude_manager.is_empty() => ManagerSelector::Any,
                None => ManagerSelector::Exclude(exclude_manager),
            };

            let registry = load_schemas(config.as_deref())?;
            let projected = extract(&object, &registry.lookup(&gvk), &select)
                .with_context(|| format!("extracting {gvk} {}", object.key()))?;
            print!("{}", value::to_yaml(&projected)?);
        }
        Command::Fieldset { object, kind, config } => {
            let object = read_object(&object)?;
            let gvk = kind_of(&object, kind)?;
            let registry = load_schemas(config.as_deref())?;

            let mut source = object;
            source.strip_server_fields();
            let typed = TypedValue::for_kind(source.into_value(), &registry.lookup(&gvk))
                .with_context(|| format!("validating {gvk}"))?;
            let json = typed.to_field_set().to_json_value()?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Command::Materialize {
            object,
            config,
            as_manager,
            host_namespace,
        } => {
            let settings = load_config(&config, host_namespace)?;
            let registry = Arc::new(settings.build_registry(base_dir(&config))?);
            let object = read_object(&object)?;
            let gvk = kind_of(&object, None)?;
            if !settings.targets.contains(&gvk) {
                bail!("{gvk} is not a configured target");
            }
            let mirror = dry_run(&settings.identity(), registry, gvk, object, &as_manager).await?;
            print!("{}", value::to_yaml(mirror.value())?);
        }
    }
    Ok(())
}

async fn dry_run(
    identity: &Identity,
    registry: Arc<SchemaRegistry>,
    gvk: GroupVersionKind,
    object: Object,
    as_manager: &str,
) -> Result<Object> {
    let tenant = Arc::new(InMemoryCluster::new("tenant", Arc::clone(&registry)));
    let host = Arc::new(InMemoryCluster::new("host", Arc::clone(&registry)));

    let source = if object.managed_fields()?.is_empty() {
        debug!(manager = as_manager, "object has no managedFields, applying it first");
        tenant
            .apply(object, &ApplyOptions::new(as_manager))
            .await
            .context("applying the object to the in-memory tenant")?
            .object
    } else {
        object
    };

    let materializer = Materializer::new(
        gvk,
        tenant,
        host.clone(),
        registry,
        Arc::new(MirrorRegistry::new()),
        Arc::new(identity.clone()),
    );
    let mirror = materializer.mirror_of(&source)?;
    let key = mirror.key();
    let outcome = host
        .apply(mirror, &ApplyOptions::new(identity.field_manager.clone()).force())
        .await
        .with_context(|| format!("applying mirror {key}"))?;
    info!(%key, "mirror built");
    Ok(outcome.object)
}

fn load_config(path: &Path, host_namespace: Option<String>) -> Result<Config> {
    let mut config = Config::load(path)?;
    if config.host_namespace.is_empty() {
        if let Some(namespace) = host_namespace {
            config.host_namespace = namespace;
        }
    }
    config
        .validate()
        .with_context(|| format!("checking {}", path.display()))?;
    Ok(config)
}

fn base_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn read_object(path: &Path) -> Result<Object> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    // YAML is a superset of JSON.
    let parsed = value::from_yaml(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Object::from_value(parsed)?)
}

fn kind_of(object: &Object, kind: Option<GroupVersionKind>) -> Result<GroupVersionKind> {
    match kind.or_else(|| object.gvk()) {
        Some(gvk) => Ok(gvk),
        None => bail!("object has no apiVersion/kind, pass --kind"),
    }
}
