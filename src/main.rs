/// Version injected at compile time via RCONNECT_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("RCONNECT_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use resource_connect::resource::{build_options, url_from_options};
use resource_connect::{Config, HttpClient, Manifest, Props, RestResource, Store, Verb};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Declarative REST resource client
#[derive(Parser, Debug)]
#[command(name = "rconnect", version, about, long_about = None)]
struct Args {
    /// Resource manifest (JSON or YAML); defaults to the last one used
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Root URL for tenant resources
    #[arg(long)]
    root_url: Option<String>,

    /// Tenant sent with tenant resources
    #[arg(long)]
    tenant: Option<String>,

    /// Access token sent with tenant resources
    #[arg(long)]
    token: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the resources declared in the manifest
    Resources,
    /// Print the URL a verb would request
    Url {
        name: String,
        #[arg(long, value_enum, default_value = "get")]
        verb: VerbArg,
        /// Primary key appended to the path
        #[arg(long)]
        pk: Option<String>,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Read a resource and print its state
    Fetch {
        name: String,
        /// Read even if an identical request was already issued
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Create a record
    Create {
        name: String,
        /// Record as JSON
        #[arg(long)]
        data: String,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Update a record
    Update {
        name: String,
        #[arg(long)]
        data: String,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Delete a record
    Delete {
        name: String,
        #[arg(long)]
        data: String,
        #[command(flatten)]
        context: ContextArgs,
    },
}

/// Caller context used to resolve templates
#[derive(ClapArgs, Debug, Default)]
struct ContextArgs {
    /// Query string, e.g. "search=ada&page=2"
    #[arg(long, default_value = "")]
    query: String,

    /// Route parameter as name=value
    #[arg(long = "param", value_parser = parse_pair)]
    params: Vec<(String, Value)>,

    /// Passthrough prop as name=value
    #[arg(long = "prop", value_parser = parse_pair)]
    props: Vec<(String, Value)>,

    /// Local resource as name=json
    #[arg(long = "local", value_parser = parse_pair)]
    locals: Vec<(String, Value)>,

    /// Data key of the resource instance
    #[arg(long)]
    data_key: Option<String>,
}

impl ContextArgs {
    fn props(&self) -> Props {
        let mut props = Props::new().with_query(&self.query);
        for (name, value) in &self.params {
            props = props.with_route_param(name, value.clone());
        }
        for (name, value) in &self.props {
            props = props.with_prop(name, value.clone());
        }
        if let Some(key) = &self.data_key {
            props = props.with_data_key(key);
        }
        props
    }
}

/// Parse `name=value`; the value is JSON when it parses as JSON, else a string
fn parse_pair(s: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VerbArg {
    Get,
    Post,
    Put,
    Delete,
}

impl From<VerbArg> for Verb {
    fn from(verb: VerbArg) -> Self {
        match verb {
            VerbArg::Get => Verb::Get,
            VerbArg::Post => Verb::Post,
            VerbArg::Put => Verb::Put,
            VerbArg::Delete => Verb::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(tracing_level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("rconnect {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("rconnect").join("rconnect.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".rconnect").join("rconnect.log");
    }
    PathBuf::from("rconnect.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();
    let Some(manifest_path) = args.manifest.clone().or_else(|| config.last_manifest.clone()) else {
        bail!("No manifest given. Use --manifest <file>");
    };
    let manifest = Manifest::load(&manifest_path)
        .with_context(|| format!("Failed to load manifest {:?}", manifest_path))?;
    tracing::info!(
        "Loaded manifest {:?} ({} resources)",
        manifest_path,
        manifest.resources.len()
    );

    if config.last_manifest.as_ref() != Some(&manifest_path) {
        if let Err(err) = config.set_last_manifest(&manifest_path) {
            tracing::warn!("Failed to save config: {:#}", err);
        }
    }

    let store = Arc::new(Store::new());
    store.set_session(config.session(
        args.root_url.as_deref(),
        args.tenant.as_deref(),
        args.token.as_deref(),
    ));

    match args.command {
        Command::Resources => {
            for name in manifest.resource_names() {
                println!("{}", name);
            }
        }
        Command::Url {
            name,
            verb,
            pk,
            context,
        } => {
            let def = manifest.resource(&name, context.data_key.as_deref())?;
            set_locals(&store, &context);
            let props = context.props();
            let url = build_options(verb.into(), &def, store.as_ref(), &props)?
                .and_then(|options| url_from_options(&options, pk.as_deref()));
            match url {
                Some(url) => println!("{}", url),
                None => bail!("'{}' cannot be resolved with the given context", name),
            }
        }
        Command::Fetch { name, force, context } => {
            let resource = bind(&manifest, &store, &name, &context)?;
            let outcome = resource.read(&context.props(), force).await?;
            tracing::info!("{}: {:?}", name, outcome);
            print_state(&store, &resource)?;
        }
        Command::Create { name, data, context } => {
            mutate(&manifest, &store, &name, &context, Verb::Post, &data).await?;
        }
        Command::Update { name, data, context } => {
            mutate(&manifest, &store, &name, &context, Verb::Put, &data).await?;
        }
        Command::Delete { name, data, context } => {
            mutate(&manifest, &store, &name, &context, Verb::Delete, &data).await?;
        }
    }

    Ok(())
}

fn set_locals(store: &Store, context: &ContextArgs) {
    for (name, value) in &context.locals {
        store.set_local(name, context.data_key.as_deref(), value.clone());
    }
}

fn bind(
    manifest: &Manifest,
    store: &Arc<Store>,
    name: &str,
    context: &ContextArgs,
) -> Result<RestResource> {
    let def = manifest.resource(name, context.data_key.as_deref())?;
    set_locals(store, context);
    Ok(RestResource::new(def, HttpClient::new()?, store.clone(), store.clone()))
}

async fn mutate(
    manifest: &Manifest,
    store: &Arc<Store>,
    name: &str,
    context: &ContextArgs,
    verb: Verb,
    data: &str,
) -> Result<()> {
    let record: Value = serde_json::from_str(data).context("--data must be JSON")?;
    let resource = bind(manifest, store, name, context)?;
    match resource.mutate(verb, record, &context.props(), false).await? {
        Some(outcome) => tracing::info!("{}: {:?}", name, outcome),
        None => bail!("'{}' cannot be resolved with the given context", name),
    }
    print_state(store, &resource)
}

fn print_state(store: &Store, resource: &RestResource) -> Result<()> {
    let state = store.state(&resource.key());
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("id=42").unwrap(), ("id".to_string(), json!(42)));
        assert_eq!(parse_pair("name=ada").unwrap(), ("name".to_string(), json!("ada")));
        assert_eq!(parse_pair("user={\"a\":1}").unwrap().1, json!({"a": 1}));
        assert!(parse_pair("novalue").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "rconnect",
            "--manifest",
            "demos/users.yaml",
            "fetch",
            "users",
            "--query",
            "search=ada",
            "--param",
            "id=7",
            "--force",
        ])
        .unwrap();
        match args.command {
            Command::Fetch { name, force, context } => {
                assert_eq!(name, "users");
                assert!(force);
                let props = context.props();
                assert_eq!(props.route_params["id"], 7);
                assert_eq!(props.query, "search=ada");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
