//! Invest CLI: read-through access to ticker data, bulk sync, and cache management.
//!
//! Commands:
//! - `get`: read one key through the cache (fetching on a miss)
//! - `fields`: list the field set, or describe one field
//! - `view`: live provider view of one entity, bypassing the cache
//! - `sync`: fill the cache for a catalog of tickers
//! - `cache status|keys|rm|set`: inspect and edit the local store
//! - `catalog`: print a catalog of ticker symbols

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use invest_core::field::{ArgValue, Field, FieldArgs, FieldKind, FieldOverrides};
use invest_core::store::Provenance;
use invest_core::sync::{sync_catalog, StdoutProgress, SyncProgress, TracingProgress};
use invest_core::{Catalog, EntityView, FieldValue, IntoKey, InvestConfig, StructuredKey};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "invest", about = "Invest CLI: read-through cache over ticker data")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory (overrides the config file and INVEST_ROOTDIR).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a key (`ENTITY/FIELD`, or a bare `ENTITY` for its history).
    Get {
        key: String,

        /// Print the value as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Report whether the value came from the local store or the remote.
        #[arg(long, default_value_t = false)]
        source: bool,
    },
    /// List all fields, or describe one.
    Fields { name: Option<String> },
    /// Query the provider directly for one entity (nothing is cached).
    View {
        entity: String,

        /// Field to show. Without it, every non-empty field is printed.
        field: Option<String>,

        /// Bind a parameter, e.g. `history.period=5d`. Repeatable.
        #[arg(long = "arg", value_name = "FIELD.PARAM=VALUE")]
        args: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch every missing (ticker, field) pair of a catalog into the cache.
    Sync {
        /// Fields to sync, comma separated. Defaults to the configured list.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Tickers to sync. Defaults to the configured catalog.
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// Symbol list or TOML universe file.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Log progress instead of printing it.
        #[arg(long, default_value_t = false)]
        quiet: bool,
    },
    /// Local store management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the symbols of a catalog.
    Catalog {
        /// Symbol list or TOML universe file. Defaults to the bundled list.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Only print the number of symbols.
        #[arg(long, default_value_t = false)]
        count: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report record count, entity count, and size.
    Status,
    /// List stored keys, optionally for one entity.
    Keys { entity: Option<String> },
    /// Delete one stored key.
    Rm { key: String },
    /// Store a JSON document under a key without fetching.
    Set {
        key: String,

        /// JSON file holding the value.
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invest=info,invest_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::Get { key, json, source } => run_get(&config, &key, json, source),
        Commands::Fields { name } => run_fields(name.as_deref()),
        Commands::View {
            entity,
            field,
            args,
            json,
        } => run_view(&config, &entity, field.as_deref(), &args, json),
        Commands::Sync {
            fields,
            symbols,
            catalog,
            quiet,
        } => run_sync(&config, &fields, symbols, catalog.as_deref(), quiet),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
            CacheAction::Keys { entity } => run_cache_keys(&config, entity.as_deref()),
            CacheAction::Rm { key } => run_cache_rm(&config, &key),
            CacheAction::Set { key, file } => run_cache_set(&config, &key, &file),
        },
        Commands::Catalog { file, count } => run_catalog(file.as_deref(), count),
    }
}

fn load_config(path: Option<&Path>, root: Option<PathBuf>) -> Result<InvestConfig> {
    let mut config = match path {
        Some(p) => InvestConfig::from_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => InvestConfig::default(),
    };
    if root.is_some() {
        config.root_dir = root;
    }
    Ok(config)
}

fn print_value(value: &FieldValue, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{value}");
    }
    Ok(())
}

fn run_get(config: &InvestConfig, key: &str, json: bool, source: bool) -> Result<()> {
    let key = key.into_key()?;
    let cache = config.open_cache(config.yahoo_provider()?)?;
    let got = cache
        .get_sourced(&key)
        .with_context(|| format!("reading {key}"))?;

    if source {
        let from = match got.source {
            Provenance::Local => "local store",
            Provenance::Remote => "remote (now cached)",
        };
        eprintln!("{key}: from {from}");
    }
    print_value(&got.value, json)
}

fn run_fields(name: Option<&str>) -> Result<()> {
    let Some(name) = name else {
        println!("{:<24} {:<13} Description", "Field", "Kind");
        for field in Field::ALL {
            let kind = match field.kind() {
                FieldKind::Attribute => "attribute",
                FieldKind::Parametrized => "parametrized",
            };
            println!("{:<24} {:<13} {}", field.as_str(), kind, field.describe());
        }
        return Ok(());
    };

    let field: Field = name.parse()?;
    println!("{field}: {}", field.describe());
    if field.params().is_empty() {
        println!("Takes no parameters.");
    } else {
        println!("Parameters:");
        for p in field.params() {
            match p.default {
                Some(d) => println!("  {} (default: {d})", p.name),
                None => println!("  {} (default: none)", p.name),
            }
        }
    }
    Ok(())
}

/// Parse `field.param=value` bindings into overrides.
fn parse_bindings(bindings: &[String]) -> Result<FieldOverrides> {
    let mut by_field: BTreeMap<Field, FieldArgs> = BTreeMap::new();
    for binding in bindings {
        let Some((path, raw)) = binding.split_once('=') else {
            bail!("expected FIELD.PARAM=VALUE, got '{binding}'");
        };
        let Some((field, param)) = path.split_once('.') else {
            bail!("expected FIELD.PARAM=VALUE, got '{binding}'");
        };
        let field: Field = field.parse()?;
        let value = match raw {
            "true" => ArgValue::from(true),
            "false" => ArgValue::from(false),
            _ => raw
                .parse::<i64>()
                .map(ArgValue::from)
                .unwrap_or_else(|_| ArgValue::from(raw)),
        };
        let args = by_field.remove(&field).unwrap_or_default().with(param, value);
        by_field.insert(field, args);
    }

    let mut overrides = FieldOverrides::new();
    for (field, args) in by_field {
        overrides = overrides.bind(field, args)?;
    }
    Ok(overrides)
}

fn run_view(
    config: &InvestConfig,
    entity: &str,
    field: Option<&str>,
    bindings: &[String],
    json: bool,
) -> Result<()> {
    let provider = config.yahoo_provider()?;
    let bound = parse_bindings(bindings)?;
    let mut overrides = config.overrides.clone();
    for (field, args) in bound.iter() {
        overrides = overrides.bind(field, args.clone())?;
    }
    let view = EntityView::with_overrides(entity, &provider, overrides);
    tracing::debug!(%view, "querying provider");

    match field {
        Some(name) => print_value(&view.get(name)?, json),
        None if json => {
            let all: BTreeMap<String, FieldValue> = view
                .all_info()?
                .into_iter()
                .map(|(f, v)| (f.to_string(), v))
                .collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
            Ok(())
        }
        None => {
            println!("{}", view.all_info_printable()?);
            Ok(())
        }
    }
}

fn run_sync(
    config: &InvestConfig,
    fields: &[String],
    symbols: Vec<String>,
    catalog_path: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let fields: Vec<Field> = if fields.is_empty() {
        config.sync.fields.clone()
    } else {
        fields
            .iter()
            .map(|f| f.trim().parse())
            .collect::<invest_core::Result<_>>()?
    };
    if fields.is_empty() {
        bail!("no fields to sync");
    }

    let catalog = if !symbols.is_empty() {
        Catalog::from_symbols(symbols)
    } else if let Some(path) = catalog_path {
        Catalog::from_file(path)?
    } else {
        config.catalog()?
    };

    let cache = config.open_cache(config.yahoo_provider()?)?;
    let mut skip_list = config.load_skip_list()?;
    tracing::info!(
        catalog = %catalog,
        fields = fields.len(),
        skip_list = skip_list.len(),
        "starting sync"
    );

    let progress: &dyn SyncProgress = if quiet { &TracingProgress } else { &StdoutProgress };
    let summary = sync_catalog(&cache, &catalog, &fields, &mut skip_list, progress)?;

    if let Some(path) = skip_list.path() {
        println!("Skip list: {} keys in {}", skip_list.len(), path.display());
    }
    if !summary.all_succeeded() {
        for (key, err) in &summary.errors {
            eprintln!("Error for {key}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_cache_status(config: &InvestConfig) -> Result<()> {
    let store = config.open_store()?;
    if !store.is_attached() {
        println!("Store directory does not exist: {}", store.root().display());
        return Ok(());
    }

    let mut total_size: u64 = 0;
    let mut entities = BTreeSet::new();
    let mut by_field: BTreeMap<Field, usize> = BTreeMap::new();
    for key in store.keys() {
        total_size += std::fs::metadata(store.path_for(&key))
            .map(|m| m.len())
            .unwrap_or(0);
        *by_field.entry(key.field()).or_default() += 1;
        entities.insert(key.entity().to_string());
    }

    if entities.is_empty() {
        println!("Store is empty: {}", store.root().display());
        return Ok(());
    }

    println!("Store: {}", store.root().display());
    println!("Entities: {}", entities.len());
    println!("Records: {}", by_field.values().sum::<usize>());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!("{:<24} {:>8}", "Field", "Records");
    for (field, n) in &by_field {
        println!("{:<24} {n:>8}", field.as_str());
    }

    let skip_list = config.load_skip_list()?;
    if !skip_list.is_empty() {
        println!();
        println!("Skip list: {} keys", skip_list.len());
    }
    Ok(())
}

fn run_cache_keys(config: &InvestConfig, entity: Option<&str>) -> Result<()> {
    let store = config.open_store()?;
    let mut keys: Vec<StructuredKey> = store
        .keys()
        .filter(|k| entity.map_or(true, |e| k.entity() == e))
        .collect();
    keys.sort();
    for key in keys {
        println!("{key}");
    }
    Ok(())
}

fn run_cache_rm(config: &InvestConfig, key: &str) -> Result<()> {
    let store = config.open_store()?;
    let key = key.into_key()?;
    store.delete(&key).with_context(|| format!("removing {key}"))?;
    println!("Removed: {key}");
    Ok(())
}

fn run_cache_set(config: &InvestConfig, key: &str, file: &Path) -> Result<()> {
    let key = key.into_key()?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;

    let store = config.open_store()?;
    store.set(&key, &FieldValue::from_json(json))?;
    println!("Stored: {key}");
    Ok(())
}

fn run_catalog(file: Option<&Path>, count: bool) -> Result<()> {
    let catalog = match file {
        Some(path) => Catalog::from_file(path)?,
        None => Catalog::bundled()?,
    };
    if count {
        println!("{}", catalog.len());
        return Ok(());
    }
    for symbol in &catalog {
        println!("{symbol}");
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
