//! SupplyGraph CLI - record transactions and trace product provenance

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::json;
use supplygraph_core::commands::{ProvenanceGraph, ingest_jsonl};
use supplygraph_core::config::Config;
use supplygraph_core::domain::graph::{
    CitizenAttributes, Direction, EdgePredicate, NodeAttributes, NodeKind, NodeRef,
    OrganisationAttributes, ProductAttributes, RelationshipKind, SortKey, TransactionPayload,
    TransactionRequest, TraversalPath, TraversalStep, UpsertOutcome, parse_timestamp,
};
use supplygraph_core::storage::CURRENT_VERSION;
use tracing::debug;

#[derive(Parser)]
#[command(name = "supplygraph")]
#[command(author, version, about = "Transaction provenance graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Register (create or update) a node
    Register {
        /// Node kind (citizen, business, manufacturer, product)
        kind: String,
        /// Node id
        id: String,
        /// Name (required for business, manufacturer and product)
        #[arg(short, long)]
        name: Option<String>,
        /// Business registration id
        #[arg(long)]
        registration_id: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long, requires = "longitude", allow_negative_numbers = true)]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude", allow_negative_numbers = true)]
        longitude: Option<f64>,
        /// Citizen UUID from the identity store
        #[arg(long)]
        citizen_uuid: Option<String>,
        /// Citizen account id
        #[arg(long)]
        account_id: Option<i64>,
        /// Fail if the node already exists
        #[arg(long)]
        strict: bool,
    },

    /// Record a transaction between two registered nodes
    Record {
        /// Relationship kind (e.g. SUPPLIES_TO)
        kind: String,
        /// Source node id or <kind>:<id>
        source: String,
        /// Target node id or <kind>:<id>
        target: String,
        /// Monetary amount
        #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
        amount: f64,
        /// Transaction date (RFC 3339 or YYYY-MM-DD, default now)
        #[arg(short, long)]
        date: Option<String>,
        /// Units traded
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        /// Product the transaction refers to
        #[arg(short, long)]
        product: Option<String>,
    },

    /// Trace which manufacturers supplied a product to the businesses selling it
    Trace {
        /// Product id
        product: String,
        /// Only deliveries on or after this date
        #[arg(short, long)]
        since: Option<String>,
    },

    /// Trace which citizens bought from businesses selling a product
    Demand {
        /// Product id
        product: String,
        /// Only purchases on or after this date
        #[arg(short, long)]
        since: Option<String>,
    },

    /// Trace which manufacturers stand behind a citizen's purchase of a product
    Origin {
        /// Citizen id
        citizen: String,
        /// Product id
        product: String,
        /// Only purchases on or after this date
        #[arg(short, long)]
        since: Option<String>,
    },

    /// List relationships of a node
    Neighbors {
        /// Node as <kind>:<id>
        node: String,
        /// Relationship kind
        #[arg(short, long)]
        kind: String,
        /// Direction (out, in, both)
        #[arg(short, long, default_value = "both")]
        direction: String,
    },

    /// Walk a typed path pattern from a node
    Walk {
        /// Start node as <kind>:<id>
        node: String,
        /// Pattern step as KIND[:out|in|both], in order
        #[arg(short, long = "step", required = true)]
        steps: Vec<String>,
        /// Hop bound (defaults to traversal.default_max_hops)
        #[arg(short, long)]
        max_hops: Option<u32>,
        /// Only relationships dated on or after this date
        #[arg(long)]
        since: Option<String>,
        /// Sort paths by final hop (date, date-desc, amount)
        #[arg(long)]
        sort: Option<String>,
        /// Stop after this many paths
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Ingest baskets from a JSON-lines file ("-" for stdin)
    Ingest {
        /// Input file
        file: PathBuf,
    },

    /// Show graph statistics
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("supplygraph=info".parse()?),
        )
        .init();
    Ok(())
}

fn report_error(e: &anyhow::Error) {
    match e.downcast_ref::<supplygraph_core::Error>() {
        Some(core) => {
            eprintln!("Error [{}]: {}", core.code(), core);
            if let Some(suggestion) = core.suggestion() {
                eprintln!("  Try: {}", suggestion);
            }
        }
        None => eprintln!("Error: {:#}", e),
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let format = cli.format;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Config { action } => {
            cmd_config(action, quiet)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Doctor => return cmd_doctor(format).await,
        _ => {}
    }

    let config = Config::load()?;
    let graph = ProvenanceGraph::open(&config).await?;
    let result = dispatch(&graph, cli.command, format, quiet).await;
    graph.close().await?;
    result
}

async fn dispatch(
    graph: &ProvenanceGraph,
    command: Commands,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Register {
            kind,
            id,
            name,
            registration_id,
            city,
            latitude,
            longitude,
            citizen_uuid,
            account_id,
            strict,
        } => {
            let kind = parse_node_kind(&kind)?;
            let attributes = match kind {
                NodeKind::Citizen => {
                    let mut attrs = CitizenAttributes::new();
                    if let Some(uuid) = citizen_uuid {
                        attrs = attrs.with_citizen_uuid(uuid);
                    }
                    if let Some(account_id) = account_id {
                        attrs = attrs.with_account_id(account_id);
                    }
                    NodeAttributes::Citizen(attrs)
                }
                NodeKind::Business | NodeKind::Manufacturer => {
                    let mut attrs = OrganisationAttributes::new(name.unwrap_or_default());
                    if let Some(registration_id) = registration_id {
                        attrs = attrs.with_registration_id(registration_id);
                    }
                    if let Some(city) = city {
                        attrs = attrs.with_city(city);
                    }
                    if let (Some(lat), Some(lon)) = (latitude, longitude) {
                        attrs = attrs.with_location(lat, lon);
                    }
                    if kind == NodeKind::Business {
                        NodeAttributes::Business(attrs)
                    } else {
                        NodeAttributes::Manufacturer(attrs)
                    }
                }
                NodeKind::Product => {
                    NodeAttributes::Product(ProductAttributes::new(name.unwrap_or_default()))
                }
            };

            let node = NodeRef::new(kind, id);
            let outcome = if strict {
                graph.register_node_strict(node.clone(), attributes).await?;
                UpsertOutcome::Created
            } else {
                graph.register_node(node.clone(), attributes).await?
            };

            match format {
                OutputFormat::Json => print_json(&json!({ "node": node, "outcome": outcome }))?,
                OutputFormat::Text if !quiet => println!("{} {}", outcome_label(outcome), node),
                OutputFormat::Text => {}
            }
        }

        Commands::Record {
            kind,
            source,
            target,
            amount,
            date,
            quantity,
            product,
        } => {
            let kind = parse_relationship_kind(&kind)?;
            let spec = graph.registry().relationship_spec(kind).ok_or_else(|| {
                supplygraph_core::Error::SchemaViolation(format!(
                    "relationship kind {} is not declared",
                    kind
                ))
            })?;
            let source = NodeRef::parse(&source, Some(spec.source))?;
            let target = NodeRef::parse(&target, Some(spec.target))?;
            let date = match date {
                Some(date) => parse_timestamp(&date)?,
                None => Utc::now(),
            };

            let mut payload = TransactionPayload::new(amount, date).with_quantity(quantity);
            if let Some(product) = product {
                payload = payload.with_product(product);
            }

            let relationship = graph
                .record(TransactionRequest::new(kind, source, target, payload))
                .await?;

            match format {
                OutputFormat::Json => print_json(relationship.as_ref())?,
                OutputFormat::Text if !quiet => println!(
                    "Recorded {} {} -> {} ({})",
                    relationship.kind, relationship.source, relationship.target, relationship.id
                ),
                OutputFormat::Text => {}
            }
        }

        Commands::Trace { product, since } => {
            let since = parse_since(since.as_deref())?;
            let rows = graph.trace_product_provenance(&product, since).await?;

            match format {
                OutputFormat::Json => print_json(&rows)?,
                OutputFormat::Text => {
                    if rows.is_empty() && !quiet {
                        println!("No supply chain found for product {}", product);
                    }
                    for row in &rows {
                        println!(
                            "{}\t{}\t{}\t{}\t{}\t{}",
                            row.manufacturer_id,
                            row.business_id,
                            row.product_id,
                            row.amount,
                            row.quantity,
                            row.date.format("%Y-%m-%d")
                        );
                    }
                }
            }
        }

        Commands::Demand { product, since } => {
            let since = parse_since(since.as_deref())?;
            let rows = graph.trace_product_demand(&product, since).await?;

            match format {
                OutputFormat::Json => print_json(&rows)?,
                OutputFormat::Text => {
                    if rows.is_empty() && !quiet {
                        println!("No purchases found for product {}", product);
                    }
                    for row in &rows {
                        println!(
                            "{}\t{}\t{}\t{}\t{}\t{}",
                            row.citizen_id,
                            row.business_id,
                            row.product_id,
                            row.amount,
                            row.quantity,
                            row.date.format("%Y-%m-%d")
                        );
                    }
                }
            }
        }

        Commands::Origin {
            citizen,
            product,
            since,
        } => {
            let since = parse_since(since.as_deref())?;
            let rows = graph.trace_purchase_origin(&citizen, &product, since).await?;

            match format {
                OutputFormat::Json => print_json(&rows)?,
                OutputFormat::Text => {
                    if rows.is_empty() && !quiet {
                        println!("No origin found for {} buying {}", citizen, product);
                    }
                    for row in &rows {
                        println!(
                            "{}\t{}\t{}\t{}\t{}",
                            row.citizen_id,
                            row.business_id,
                            row.manufacturer_id,
                            row.amount,
                            row.date.format("%Y-%m-%d")
                        );
                    }
                }
            }
        }

        Commands::Neighbors {
            node,
            kind,
            direction,
        } => {
            let node = NodeRef::parse(&node, None)?;
            let kind = parse_relationship_kind(&kind)?;
            let direction = Direction::parse(&direction).ok_or_else(|| {
                anyhow::anyhow!("Invalid direction: {}. Valid options: out, in, both", direction)
            })?;
            let neighbors = graph.neighbors(&node, kind, direction).await?;

            match format {
                OutputFormat::Json => {
                    let relationships: Vec<_> = neighbors.iter().map(|r| r.as_ref()).collect();
                    print_json(&relationships)?;
                }
                OutputFormat::Text => {
                    for relationship in &neighbors {
                        println!(
                            "#{}\t{}\t{} -> {}\t{}\t{}",
                            relationship.sequence,
                            relationship.kind,
                            relationship.source,
                            relationship.target,
                            relationship.payload.amount,
                            relationship.payload.date.to_rfc3339()
                        );
                    }
                }
            }
        }

        Commands::Walk {
            node,
            steps,
            max_hops,
            since,
            sort,
            limit,
        } => {
            let mut query = graph.query(NodeRef::parse(&node, None)?);
            if let Some(max_hops) = max_hops {
                query.max_hops = max_hops;
            }
            let since = since.as_deref().map(parse_timestamp).transpose()?;
            for step in &steps {
                let mut step = parse_step(step)?;
                if let Some(since) = since {
                    step = step.with_predicate(EdgePredicate::DateOnOrAfter(since));
                }
                query = query.step(step);
            }
            if let Some(sort) = sort {
                query = query.sorted_by(parse_sort_key(&sort)?);
            }

            // Dropping the stream after `limit` paths ends the walk early
            let mut stream = graph.traverse(query)?;
            let mut paths = Vec::new();
            let mut emitted = 0;
            while let Some(path) = stream.next().await {
                let path = path?;
                match format {
                    OutputFormat::Json => paths.push(path_json(&path)),
                    OutputFormat::Text => println!("{}", path_line(&path)),
                }
                emitted += 1;
                if limit.is_some_and(|limit| emitted >= limit) {
                    break;
                }
            }
            if format == OutputFormat::Json {
                print_json(&paths)?;
            }
        }

        Commands::Ingest { file } => {
            let report = if file.as_os_str() == "-" {
                ingest_jsonl(graph, tokio::io::BufReader::new(tokio::io::stdin())).await?
            } else {
                let handle = tokio::fs::File::open(&file).await.map_err(|e| {
                    anyhow::anyhow!("Failed to open {}: {}", file.display(), e)
                })?;
                ingest_jsonl(graph, tokio::io::BufReader::new(handle)).await?
            };

            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => {
                    if !quiet {
                        println!(
                            "Ingested {} baskets ({} relationships)",
                            report.baskets, report.relationships
                        );
                    }
                    for failure in &report.failures {
                        let retry = if failure.retryable { " (retryable)" } else { "" };
                        eprintln!(
                            "line {}: [{}] {}{}",
                            failure.line, failure.code, failure.message, retry
                        );
                    }
                }
            }

            if !report.is_clean() {
                return Ok(ExitCode::from(2));
            }
        }

        Commands::Stats => {
            let stats = graph.stats().await?;

            match format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Text => {
                    println!("Nodes: {}", stats.total_nodes);
                    for (kind, count) in &stats.nodes_by_kind {
                        println!("  {}: {}", kind, count);
                    }
                    println!("Relationships: {}", stats.total_relationships);
                    for (kind, count) in &stats.relationships_by_kind {
                        println!("  {}: {}", kind, count);
                    }
                }
            }
        }

        Commands::Config { .. } | Commands::Doctor => {}
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helpers
// ============================================================================

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_node_kind(kind: &str) -> anyhow::Result<NodeKind> {
    NodeKind::parse(kind).ok_or_else(|| {
        let valid: Vec<&str> = NodeKind::all().iter().map(|k| k.as_str()).collect();
        anyhow::anyhow!("Invalid node kind: {}. Valid options: {}", kind, valid.join(", "))
    })
}

fn parse_relationship_kind(kind: &str) -> anyhow::Result<RelationshipKind> {
    RelationshipKind::parse(kind).ok_or_else(|| {
        let valid: Vec<&str> = RelationshipKind::all().iter().map(|k| k.as_str()).collect();
        anyhow::anyhow!(
            "Invalid relationship kind: {}. Valid options: {}",
            kind,
            valid.join(", ")
        )
    })
}

/// Lower bound of a query window; no bound means all history
fn parse_since(since: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match since {
        Some(since) => Ok(parse_timestamp(since)?),
        None => Ok(DateTime::<Utc>::MIN_UTC),
    }
}

fn outcome_label(outcome: UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Created => "Created",
        UpsertOutcome::Updated => "Updated",
        UpsertOutcome::Unchanged => "Unchanged",
    }
}

/// Parse `KIND[:out|in|both]`; a bare kind walks outgoing
fn parse_step(step: &str) -> anyhow::Result<TraversalStep> {
    let (kind, direction) = match step.rsplit_once(':') {
        Some((kind, direction)) => (
            kind,
            Direction::parse(direction).ok_or_else(|| {
                anyhow::anyhow!("Invalid direction in step {}. Valid options: out, in, both", step)
            })?,
        ),
        None => (step, Direction::Outgoing),
    };
    Ok(TraversalStep::new(parse_relationship_kind(kind)?, direction))
}

fn parse_sort_key(sort: &str) -> anyhow::Result<SortKey> {
    match sort {
        "date" => Ok(SortKey::DateAscending),
        "date-desc" => Ok(SortKey::DateDescending),
        "amount" => Ok(SortKey::AmountDescending),
        _ => Err(anyhow::anyhow!(
            "Invalid sort key: {}. Valid options: date, date-desc, amount",
            sort
        )),
    }
}

fn path_line(path: &TraversalPath) -> String {
    let mut line = path.seed.to_string();
    for hop in &path.hops {
        line.push_str(&format!(" -[{}]-> {}", hop.relationship.kind, hop.node));
    }
    if let Some(hop) = path.last() {
        line.push_str(&format!(
            "\t{}\t{}",
            hop.relationship.payload.amount,
            hop.relationship.payload.date.format("%Y-%m-%d")
        ));
    }
    line
}

fn path_json(path: &TraversalPath) -> serde_json::Value {
    let hops: Vec<_> = path
        .hops
        .iter()
        .map(|hop| json!({ "node": hop.node, "relationship": &*hop.relationship }))
        .collect();
    json!({ "seed": path.seed, "hops": hops })
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(format: OutputFormat) -> anyhow::Result<ExitCode> {
    let mut checks: Vec<(&str, bool, String)> = Vec::new();

    let config = match Config::load() {
        Ok(config) => {
            checks.push(("config", true, "Valid".to_string()));
            Some(config)
        }
        Err(e) => {
            checks.push(("config", false, format!("{:#}", e)));
            None
        }
    };

    match Config::config_path() {
        Ok(path) if path.exists() => checks.push(("config_file", true, path.display().to_string())),
        Ok(path) => checks.push((
            "config_file",
            true,
            format!("{} (using defaults)", path.display()),
        )),
        Err(e) => checks.push(("config_file", false, format!("{:#}", e))),
    }

    if let Some(config) = config {
        match ProvenanceGraph::open(&config).await {
            Ok(graph) => {
                checks.push(("store", true, config.store.backend.clone()));

                if let Some(database) = graph.database() {
                    match database.health_check().await {
                        Ok(()) => {
                            let journal = database
                                .journal_mode()
                                .await
                                .unwrap_or_else(|_| "unknown".to_string());
                            checks.push((
                                "database",
                                true,
                                format!("Reachable (journal: {})", journal),
                            ));
                        }
                        Err(e) => checks.push(("database", false, format!("{:#}", e))),
                    }
                    match database.migration_status().await {
                        Ok(status) if status.needs_migration => checks.push((
                            "schema",
                            false,
                            format!(
                                "Migrations pending (v{} -> v{})",
                                status.current_version, status.target_version
                            ),
                        )),
                        Ok(status) => checks.push((
                            "schema",
                            true,
                            format!("v{} ({})", status.current_version, database.path().display()),
                        )),
                        Err(e) => checks.push(("schema", false, format!("{:#}", e))),
                    }
                }

                match graph.stats().await {
                    Ok(stats) => checks.push((
                        "graph",
                        true,
                        format!(
                            "{} nodes, {} relationships",
                            stats.total_nodes, stats.total_relationships
                        ),
                    )),
                    Err(e) => checks.push(("graph", false, e.to_string())),
                }
                graph.close().await?;
            }
            Err(e) => checks.push(("store", false, format!("{:#}", e))),
        }
    }

    let all_ok = checks.iter().all(|(_, ok, _)| *ok);
    debug!(all_ok, expected_schema = CURRENT_VERSION, "Health check finished");

    match format {
        OutputFormat::Json => {
            let checks: Vec<_> = checks
                .iter()
                .map(|(name, ok, detail)| json!({ "check": name, "ok": ok, "detail": detail }))
                .collect();
            print_json(&json!({ "ok": all_ok, "checks": checks }))?;
        }
        OutputFormat::Text => {
            println!("SupplyGraph Health Check");
            println!("========================");
            println!();
            for (name, ok, detail) in &checks {
                println!("[{}] {}: {}", if *ok { "OK" } else { "!!" }, name, detail);
            }
            println!();
            if all_ok {
                println!("All checks passed!");
            } else {
                println!("Some checks failed. See above for details.");
            }
        }
    }

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
