use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use bidgraph_core::{ConfigManager, EngineConfig, EntityId, EntityKind, EntityRef};
use bidgraph_engine::{
    Bid, BidSnapshot, DrainReport, GroupProp, GroupTotals, LineItemProp, SettledEvent,
    VariableValue,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "bidgraph")]
#[command(about = "BidGraph CLI - Reactive bid estimate assessment", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "BIDGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a snapshot, assess it and print the bid totals
    Assess {
        /// Snapshot JSON file
        snapshot: PathBuf,
    },

    /// Apply edits to a snapshot and print the settled totals
    Set {
        /// Snapshot JSON file
        snapshot: PathBuf,

        /// Edit to apply, repeatable. Forms: `line_item:ID.PROP=V`,
        /// `component:ID.PROP=V`, `dynamic_group:ID.PROP=V`, `field:ID=V`,
        /// `var:NAME=V` (true/false or a number), `watts=V`
        #[arg(short, long = "edit", value_parser = parse_edit, required = true)]
        edits: Vec<EditArg>,

        /// Write the resulting snapshot here
        #[arg(short, long)]
        write: Option<PathBuf>,
    },

    /// Re-drive assessment until the bid price stops moving
    Check {
        /// Snapshot JSON file
        snapshot: PathBuf,
    },

    /// Assess a snapshot and export it again
    Export {
        /// Snapshot JSON file
        snapshot: PathBuf,

        /// Include every entity's config block
        #[arg(long)]
        full: bool,

        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = ".bidgraph.toml")]
        path: PathBuf,
    },
}

/// One edit from the command line.
#[derive(Debug, Clone, PartialEq)]
enum EditArg {
    LineItem {
        id: EntityId,
        prop: LineItemProp,
        value: f64,
    },
    Group {
        group: EntityRef,
        prop: GroupProp,
        value: f64,
    },
    Field {
        id: EntityId,
        value: f64,
    },
    Variable {
        name: String,
        value: VariableValue,
    },
    Watts(f64),
}

fn parse_number(raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| format!("not a number: {}", raw))
}

fn parse_edit(raw: &str) -> Result<EditArg, String> {
    let (target, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TARGET=VALUE, got {}", raw))?;
    let target = target.trim();

    if target == "watts" {
        return Ok(EditArg::Watts(parse_number(value)?));
    }
    let (kind, rest) = target
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:ID, got {}", target))?;

    match kind {
        "var" | "variable" => {
            let value = match value.trim() {
                "true" => VariableValue::Toggle(true),
                "false" => VariableValue::Toggle(false),
                other => VariableValue::Number(parse_number(other)?),
            };
            Ok(EditArg::Variable {
                name: rest.to_string(),
                value,
            })
        }
        "field" => Ok(EditArg::Field {
            id: EntityId::from(rest),
            value: parse_number(value)?,
        }),
        other => {
            let kind = EntityKind::from_str(other)?;
            let (id, prop) = rest
                .rsplit_once('.')
                .ok_or_else(|| format!("expected ID.PROP, got {}", rest))?;
            let value = parse_number(value)?;
            match kind {
                EntityKind::LineItem => Ok(EditArg::LineItem {
                    id: EntityId::from(id),
                    prop: prop.parse()?,
                    value,
                }),
                EntityKind::Component | EntityKind::DynamicGroup => Ok(EditArg::Group {
                    group: EntityRef::new(kind, id),
                    prop: prop.parse()?,
                    value,
                }),
                other => Err(format!("{} values cannot be edited here", other)),
            }
        }
    }
}

// Output structures
#[derive(Serialize)]
struct AssessResult {
    bid_id: String,
    title: String,
    line_items: usize,
    cost: f64,
    tax: f64,
    markup: f64,
    price: f64,
    labor_hours: f64,
    included_line_items: usize,
    has_null_dependency: bool,
    is_predicted: bool,
    steps: usize,
    breaker_trips: u64,
    settle_events: usize,
}

impl AssessResult {
    fn new(bid: &Bid, report: DrainReport, events: &[SettledEvent]) -> Self {
        let totals: &GroupTotals = bid.totals();
        let price = bid.provenance().get(GroupProp::Price);
        Self {
            bid_id: bid.id().to_string(),
            title: bid.title().to_string(),
            line_items: bid.store().line_items.len(),
            cost: totals.cost,
            tax: totals.tax,
            markup: totals.markup,
            price: totals.price,
            labor_hours: totals.labor_hours,
            included_line_items: totals.included_line_item_count,
            has_null_dependency: price.has_null_dependency,
            is_predicted: price.is_predicted,
            steps: report.steps,
            breaker_trips: bid.breaker_trips(),
            settle_events: events.len(),
        }
    }
}

#[derive(Serialize)]
struct CheckResult {
    bid_id: String,
    stable: bool,
    attempts: u32,
    price: f64,
    message: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(manager.config(), cli.verbose);
    debug!(path = ?manager.config_path(), "configuration ready");

    match execute_command(&cli, manager.into_config()) {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &EngineConfig, verbose: bool) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_snapshot(path: &Path) -> Result<BidSnapshot> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    BidSnapshot::from_json(&json).with_context(|| format!("Failed to parse snapshot {}", path.display()))
}

fn load_bid(path: &Path, config: EngineConfig) -> Result<Bid> {
    let bid = Bid::from_snapshot(read_snapshot(path)?, config)
        .with_context(|| format!("Failed to load bid from {}", path.display()))?;
    info!(bid = %bid.id(), entities = bid.store().len(), "bid ready");
    Ok(bid)
}

fn drain_events(rx: &mut broadcast::Receiver<SettledEvent>) -> Vec<SettledEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn execute_command(cli: &Cli, config: EngineConfig) -> Result<serde_json::Value> {
    match &cli.command {
        Commands::Assess { snapshot } => {
            let mut bid = load_bid(snapshot, config)?;
            let mut rx = bid.subscribe_settled();
            bid.request_full_assessment();
            let report = bid.run_until_idle();
            let events = drain_events(&mut rx);
            Ok(serde_json::to_value(AssessResult::new(&bid, report, &events))?)
        }

        Commands::Set {
            snapshot,
            edits,
            write,
        } => {
            let mut bid = load_bid(snapshot, config)?;
            let mut rx = bid.subscribe_settled();
            for edit in edits {
                apply_edit(&mut bid, edit)?;
            }
            let report = bid.run_until_idle();
            let events = drain_events(&mut rx);

            if let Some(path) = write {
                write_snapshot(&bid.export(true), path)?;
            }
            Ok(serde_json::to_value(AssessResult::new(&bid, report, &events))?)
        }

        Commands::Check { snapshot } => {
            let mut bid = load_bid(snapshot, config)?;
            let result = match bid.reassess_until_stable() {
                Ok(attempts) => CheckResult {
                    bid_id: bid.id().to_string(),
                    stable: true,
                    attempts,
                    price: bid.totals().price,
                    message: "bid is stable".to_string(),
                },
                Err(e) if e.is_non_convergence() => CheckResult {
                    bid_id: bid.id().to_string(),
                    stable: false,
                    attempts: bid.config().assessment.max_reassess_attempts,
                    price: bid.totals().price,
                    message: e.to_string(),
                },
                Err(e) => return Err(e).context("Failed to reassess bid"),
            };
            Ok(serde_json::to_value(result)?)
        }

        Commands::Export { snapshot, full, out } => {
            let bid = load_bid(snapshot, config)?;
            let exported = bid.export(*full);
            match out {
                Some(path) => {
                    write_snapshot(&exported, path)?;
                    Ok(serde_json::json!({
                        "bid_id": bid.id().to_string(),
                        "written": path.display().to_string(),
                        "line_items": exported.line_items.len(),
                    }))
                }
                None => Ok(serde_json::to_value(&exported)?),
            }
        }

        Commands::InitConfig { path } => {
            ConfigManager::create_default_config(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(serde_json::json!({
                "written": path.display().to_string(),
                "status": "created",
            }))
        }
    }
}

fn apply_edit(bid: &mut Bid, edit: &EditArg) -> Result<()> {
    debug!(?edit, "applying edit");
    match edit {
        EditArg::LineItem { id, prop, value } => bid
            .set_line_item_value(id, *prop, *value)
            .with_context(|| format!("Failed to set {}.{}", id, prop.as_str())),
        EditArg::Group { group, prop, value } => bid
            .set_group_value(group, *prop, *value)
            .with_context(|| format!("Failed to set {}.{}", group, prop.as_str())),
        EditArg::Field { id, value } => {
            let is_toggle = bid.field(id).is_some_and(|f| f.is_toggle());
            if is_toggle {
                bid.set_field_toggle(id, *value != 0.0)
            } else {
                bid.set_field_value(id, Some(*value))
            }
            .with_context(|| format!("Failed to set field {}", id))
        }
        EditArg::Variable { name, value } => bid
            .set_variable(name, *value)
            .with_context(|| format!("Failed to set variable {}", name)),
        EditArg::Watts(watts) => bid.set_watts(*watts).context("Failed to set watts"),
    }
}

fn write_snapshot(snapshot: &BidSnapshot, path: &Path) -> Result<()> {
    let json = snapshot.to_json_pretty()?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}: {}", key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}: {}", key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}: {}", key_colored, val_colored);
                    }
                    _ => {
                        println!("{}: {}", key_colored, val);
                    }
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("\n{}{}:", "Item ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item)?;
            }
        }
        _ => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}
