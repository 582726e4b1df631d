//! Command-line host for modana extensions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modana_core::command::{CommandDescriptor, CommandValue, ValueType};
use modana_core::config::{env_vars, CoreConfig};
use modana_core::event::EventType;
use modana_core::extension::{
    Extension, ExtensionContext, ExtensionDescriptor, ExtensionManager, InitError, StartupSummary,
};

/// modana - load extensions and run them against the shared core.
#[derive(Parser, Debug)]
#[command(name = "modana")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Additional directory to scan for native extensions. May be repeated.
    #[arg(short = 'd', long = "extension-dir", global = true)]
    extension_dirs: Vec<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load and start every extension, print the startup summary, then shut down.
    Run {
        /// Skip an extension by name. May be repeated.
        #[arg(long = "disable")]
        disabled: Vec<String>,
        /// Invoke a registered command after startup.
        #[arg(long)]
        invoke: Option<String>,
        /// Arguments for --invoke, parsed as JSON scalars when possible.
        #[arg(requires = "invoke")]
        args: Vec<String>,
    },
    /// List discovered extensions without starting them.
    List {
        /// Print descriptors as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved load order.
    Order,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    match args.command {
        Command::Run {
            disabled,
            invoke,
            args,
        } => {
            let config = disabled.into_iter().fold(config, CoreConfig::with_disabled);
            run(config, invoke, args)
        }
        Command::List { json } => list(config, json),
        Command::Order => order(config),
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "modana=debug" } else { "modana=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so command output stays parseable.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

/// File values first, then the environment, then command-line flags.
fn load_config(args: &Args) -> Result<CoreConfig> {
    let config = match &args.config {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => CoreConfig::default(),
    };
    let config = config.apply_env()?;
    Ok(args
        .extension_dirs
        .iter()
        .cloned()
        .fold(config, CoreConfig::with_extension_dir))
}

fn manager(config: CoreConfig) -> Result<ExtensionManager> {
    let mut manager = ExtensionManager::new(config);
    manager.register_builtin(Shell)?;
    let report = manager.discover();
    for (path, err) in &report.failed {
        eprintln!("warning: skipped {}: {}", path.display(), err);
    }
    Ok(manager)
}

fn run(config: CoreConfig, invoke: Option<String>, args: Vec<String>) -> Result<()> {
    let mut manager = manager(config)?;
    let summary = manager.start()?;
    print_summary(&summary);

    let outcome = match invoke {
        Some(name) => {
            let args = args.iter().map(|a| parse_argument(a)).collect();
            manager
                .services()
                .commands
                .invoke(&name, args)
                .map(|value| println!("{}", serde_json::to_string(&value).unwrap_or_default()))
                .with_context(|| format!("command {name} failed"))
        }
        None => Ok(()),
    };

    manager.shutdown();
    outcome
}

fn print_summary(summary: &StartupSummary) {
    println!("Load order: {}", summary.order.join(" -> "));
    print!("{summary}");
}

fn list(config: CoreConfig, json: bool) -> Result<()> {
    let manager = manager(config)?;
    let descriptors = manager.descriptors();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    println!("{:<24} {:<10} {:<12} {}", "NAME", "VERSION", "STATE", "ORIGIN");
    for descriptor in &descriptors {
        print_row(descriptor);
    }
    Ok(())
}

fn print_row(descriptor: &ExtensionDescriptor) {
    println!(
        "{:<24} {:<10} {:<12} {}",
        descriptor.name,
        descriptor.version.to_string(),
        descriptor.state.to_string(),
        descriptor.origin
    );
    if !descriptor.dependencies.is_empty() {
        println!("    depends on: {}", descriptor.dependencies.join(", "));
    }
}

fn order(config: CoreConfig) -> Result<()> {
    let manager = manager(config)?;
    for (extension, dependency) in manager.unknown_dependencies() {
        eprintln!("warning: {extension} requires unknown extension {dependency}");
    }
    for (position, name) in manager.resolve_order()?.iter().enumerate() {
        println!("{:>3}. {}", position + 1, name);
    }
    Ok(())
}

/// Read a command-line argument as a JSON scalar, falling back to a string.
fn parse_argument(raw: &str) -> CommandValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Null) => CommandValue::Unit,
        Ok(serde_json::Value::Bool(b)) => CommandValue::Boolean(b),
        Ok(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => CommandValue::Integer(i),
            None => CommandValue::Float(n.as_f64().unwrap_or_default()),
        },
        Ok(serde_json::Value::String(s)) => CommandValue::String(s),
        Ok(value) => CommandValue::Json(value),
        Err(_) => CommandValue::String(raw.to_string()),
    }
}

/// Host extension exposing introspection commands.
struct Shell;

impl Extension for Shell {
    fn name(&self) -> &str {
        "shell"
    }

    fn init(&mut self, ctx: &ExtensionContext) -> Result<(), InitError> {
        ctx.register_command(
            CommandDescriptor::new("shell.version", |_| {
                Ok(CommandValue::from(env!("CARGO_PKG_VERSION")))
            })
            .with_description("Host version")
            .returns(ValueType::String),
        )?;

        ctx.register_command(
            CommandDescriptor::new("shell.echo", |args| {
                Ok(args.first().cloned().unwrap_or_default())
            })
            .with_description("Return the argument unchanged")
            .param("value", ValueType::Any)
            .returns(ValueType::Any),
        )?;

        let catalog = ctx.command_catalog();
        ctx.register_command(
            CommandDescriptor::new("shell.commands", move |_| {
                let names: Vec<serde_json::Value> = catalog
                    .list()
                    .into_iter()
                    .map(|sig| sig.to_string().into())
                    .collect();
                Ok(CommandValue::Json(names.into()))
            })
            .with_description("Signatures of every registered command")
            .returns(ValueType::Json),
        )?;

        ctx.subscribe(EventType::EXTENSIONS_READY, |event| {
            if let Some(summary) = event.payload::<StartupSummary>() {
                tracing::debug!(active = summary.active.len(), "extensions ready");
            }
            Ok(())
        });
        Ok(())
    }
}
