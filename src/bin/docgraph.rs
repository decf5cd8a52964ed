//! docgraph - command-line front end for the graph store
//!
//! Usage:
//!   docgraph [--config FILE] [--db NAME] [--data-dir DIR] [-v] <command>
//!
//! Every command opens the store, does its work and releases the store again,
//! also when it fails. Failures print a message to stderr and exit with 1.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use docgraph::bulk::{self, tabular, ExportOptions, Format, ImportOptions};
use docgraph::snapshot;
use docgraph::{
    Database, Document, Filter, FindOptions, GraphError, Node, Note, ObjectId, SortDirection, StoreConfig,
};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "docgraph", version, about = "Graph-structured data layer over an embedded document store")]
struct Cli {
    /// TOML config file (database, data_dir, timeout_ms)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database name (overrides config and DOCGRAPH_DATABASE)
    #[arg(long = "db")]
    database: Option<String>,

    /// Store directory (overrides config and DOCGRAPH_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Node operations
    #[command(subcommand)]
    Node(NodeCommand),
    /// Edge operations
    #[command(subcommand)]
    Edge(EdgeCommand),
    /// Note operations
    #[command(subcommand)]
    Note(NoteCommand),
    /// Per-collection document counts
    Stats,
    /// Snapshot operations
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// Remove every document from a collection
    Clear {
        /// Collection name, or `all`
        #[arg(long)]
        collection: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Irreversibly remove a database
    Drop {
        /// Database to drop
        #[arg(long = "db")]
        name: String,
        /// Must repeat the database name
        #[arg(long)]
        confirm: String,
    },
}

#[derive(Subcommand)]
enum NodeCommand {
    /// Add a node
    Add {
        #[arg(long, required_unless_present = "file")]
        name: Option<String>,
        #[arg(long = "type", default_value = "generic")]
        node_type: String,
        /// Properties as a JSON object
        #[arg(long)]
        properties: Option<String>,
        /// Whole node document as a JSON file
        #[arg(long, conflicts_with_all = ["name", "properties"])]
        file: Option<PathBuf>,
    },
    /// Show a node
    Get {
        #[arg(long, required_unless_present = "id")]
        name: Option<String>,
        #[arg(long, conflicts_with = "name")]
        id: Option<String>,
    },
    /// List nodes
    List {
        /// Maximum number of nodes (0 = no limit)
        #[arg(long)]
        limit: Option<usize>,
        /// Field path to sort by
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,
    },
    /// Update fields of a node by dotted path
    Update {
        #[arg(long)]
        name: String,
        /// `path=value`; values are parsed as JSON, falling back to text
        #[arg(long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,
        /// JSON object of path -> value
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Delete a node by name
    Delete {
        #[arg(long)]
        name: String,
    },
    /// Import nodes from a file
    Import(ImportArgs),
    /// Export nodes to a file
    Export(ExportArgs),
}

#[derive(Args)]
struct ImportArgs {
    file: PathBuf,
    /// json, jsonl, csv or tsv; detected from the extension when omitted
    #[arg(long)]
    format: Option<Format>,
    /// Merge into nodes of the same name instead of skipping them
    #[arg(long)]
    update_existing: bool,
}

#[derive(Args)]
struct ExportArgs {
    file: PathBuf,
    #[arg(long)]
    format: Option<Format>,
    /// Comma-separated field paths
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,
    /// Equality filter as a JSON object of path -> value
    #[arg(long)]
    filter: Option<String>,
    #[arg(long)]
    include_id: bool,
}

#[derive(Subcommand)]
enum EdgeCommand {
    /// Connect two nodes by name
    Add {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long = "type")]
        edge_type: Option<String>,
        /// Extra edge data as a JSON object
        #[arg(long)]
        data: Option<String>,
    },
    /// Show the outgoing connections of a node
    Get {
        #[arg(long)]
        name: String,
    },
    /// Remove edges between two nodes
    Remove {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Remove only the oldest matching edge
        #[arg(long)]
        one: bool,
    },
}

#[derive(Subcommand)]
enum NoteCommand {
    /// Attach a note to a node
    Add {
        #[arg(long)]
        node: String,
        #[arg(long)]
        trigger: String,
        #[arg(long)]
        effect: String,
        #[arg(long)]
        clear_after_use: bool,
    },
    /// Show a node's notes and clear the consumable ones
    Process {
        #[arg(long)]
        node: String,
    },
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// Write a snapshot of the whole database
    Create {
        #[arg(long, default_value = "backups")]
        dir: PathBuf,
    },
    /// Replace the database contents with a snapshot
    Restore { file: PathBuf },
    /// List snapshot files, newest first
    List {
        #[arg(long, default_value = "backups")]
        dir: PathBuf,
    },
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_object(json: &str, what: &str) -> anyhow::Result<Document> {
    match serde_json::from_str(json).with_context(|| format!("{} is not valid JSON", what))? {
        serde_json::Value::Object(map) => Ok(Document::from_json(map)),
        _ => bail!("{} must be a JSON object", what),
    }
}

fn read_object(path: &Path) -> anyhow::Result<Document> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("cannot read {:?}", path))?;
    parse_object(&contents, &path.display().to_string())
}

fn parse_assignment(assignment: &str) -> anyhow::Result<(String, docgraph::Value)> {
    let Some((path, value)) = assignment.split_once('=') else {
        bail!("expected PATH=VALUE, got '{}'", assignment);
    };
    Ok((path.trim().to_string(), tabular::parse_cell(value)))
}

fn print_document(doc: &Document) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(doc.to_json()))?);
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

// ============================================================================
// Commands
// ============================================================================

fn node_command(db: &Database, command: NodeCommand) -> anyhow::Result<()> {
    let nodes = db.nodes();
    match command {
        NodeCommand::Add { name, node_type, properties, file } => {
            let id = match file {
                Some(file) => nodes.add_document(read_object(&file)?)?,
                None => {
                    let mut node = Node::new(name.unwrap_or_default(), node_type);
                    if let Some(properties) = properties {
                        node.properties = parse_object(&properties, "--properties")?;
                    }
                    nodes.add(&node)?
                }
            };
            println!("Added node {}", id);
        }
        NodeCommand::Get { name, id } => {
            let node = match (id, name) {
                (Some(id), _) => nodes.require_by_id(id.parse::<ObjectId>()?)?,
                (None, Some(name)) => nodes.require_by_name(&name)?,
                (None, None) => bail!("pass --name or --id"),
            };
            print_document(&node.to_document())?;
        }
        NodeCommand::List { limit, sort, desc } => {
            let mut options = FindOptions::new();
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            if let Some(field) = sort {
                let direction = if desc { SortDirection::Descending } else { SortDirection::Ascending };
                options = options.sort(field, direction);
            }
            let listed = nodes.list(&options)?;
            for node in &listed {
                println!(
                    "{}  {:<24} {}",
                    node.id.map(|id| id.to_hex()).unwrap_or_default(),
                    node.name.as_deref().unwrap_or("-"),
                    node.node_type.as_deref().unwrap_or("-")
                );
            }
            println!("{} node(s)", listed.len());
        }
        NodeCommand::Update { name, set, file } => {
            let mut updates = match file {
                Some(file) => read_object(&file)?,
                None => Document::new(),
            };
            for assignment in &set {
                let (path, value) = parse_assignment(assignment)?;
                updates.insert(path, value);
            }
            if updates.is_empty() {
                bail!("nothing to update: pass --set PATH=VALUE or --file");
            }
            let id = nodes.id_of(&name)?;
            let matched = nodes.update(id, updates)?;
            println!("Updated {} node(s)", matched);
        }
        NodeCommand::Delete { name } => {
            let deleted = nodes.delete_by_name(&name)?;
            if deleted == 0 {
                return Err(GraphError::NotFound(format!("node '{}'", name)).into());
            }
            println!("Deleted {} node(s)", deleted);
        }
        NodeCommand::Import(args) => {
            let options = ImportOptions {
                format: args.format,
                update_existing: args.update_existing,
            };
            let summary = bulk::import_nodes(db, &args.file, &options)?;
            println!("Import: {}", summary);
            for error in &summary.errors {
                eprintln!("  {}", error);
            }
        }
        NodeCommand::Export(args) => {
            let filter = match &args.filter {
                Some(json) => Filter::from_document(parse_object(json, "--filter")?),
                None => Filter::all(),
            };
            let options = ExportOptions {
                filter,
                fields: args.fields,
                format: args.format,
                include_id: args.include_id,
            };
            let written = bulk::export_nodes(db, &args.file, &options)?;
            println!("Exported {} node(s) to {}", written, args.file.display());
        }
    }
    Ok(())
}

fn edge_command(db: &Database, command: EdgeCommand) -> anyhow::Result<()> {
    let nodes = db.nodes();
    match command {
        EdgeCommand::Add { from, to, edge_type, data } => {
            let from_id = nodes.id_of(&from)?;
            let to_id = nodes.id_of(&to)?;
            let mut data = match data {
                Some(json) => parse_object(&json, "--data")?,
                None => Document::new(),
            };
            if let Some(edge_type) = edge_type {
                data.insert("type", edge_type);
            }
            let id = db.edges().add(from_id, to_id, data)?;
            println!("Added edge {} ({} -> {})", id, from, to);
        }
        EdgeCommand::Get { name } => {
            let id = nodes.id_of(&name)?;
            let connections = db.edges().get_connections(id)?;
            for connection in &connections {
                println!("{}", connection.to_document());
            }
            println!("{} connection(s) from '{}'", connections.len(), name);
        }
        EdgeCommand::Remove { from, to, one } => {
            let from_id = nodes.id_of(&from)?;
            let to_id = nodes.id_of(&to)?;
            let removed = if one {
                db.edges().remove_one(from_id, to_id)?
            } else {
                db.edges().remove(from_id, to_id)?
            };
            println!("Removed {} edge(s)", removed);
        }
    }
    Ok(())
}

fn note_command(db: &Database, command: NoteCommand) -> anyhow::Result<()> {
    match command {
        NoteCommand::Add { node, trigger, effect, clear_after_use } => {
            let id = db.nodes().id_of(&node)?;
            db.notes().add_note(id, &Note::new(trigger, effect, clear_after_use))?;
            println!("Added note to '{}'", node);
        }
        NoteCommand::Process { node } => {
            let id = db.nodes().id_of(&node)?;
            let notes = db.notes().process_and_clear(id)?;
            for note in &notes {
                let marker = if note.clear_after_use { " (cleared)" } else { "" };
                println!("{}: {}{}", note.trigger, note.effect, marker);
            }
            println!("{} note(s) on '{}'", notes.len(), node);
        }
    }
    Ok(())
}

fn snapshot_command(db: &Database, command: SnapshotCommand) -> anyhow::Result<()> {
    match command {
        SnapshotCommand::Create { dir } => {
            let path = snapshot::create_snapshot(db, &dir)?;
            println!("Snapshot saved to {}", path.display());
        }
        SnapshotCommand::Restore { file } => {
            let summary = snapshot::restore_snapshot(db, &file)?;
            println!(
                "Restored {} collection(s), {} document(s) from {}",
                summary.collections,
                summary.documents,
                file.display()
            );
        }
        SnapshotCommand::List { dir } => {
            for path in snapshot::list_snapshots(&dir)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = StoreConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    Database::with(&config, |db| match cli.command {
        Command::Node(command) => node_command(db, command),
        Command::Edge(command) => edge_command(db, command),
        Command::Note(command) => note_command(db, command),
        Command::Snapshot(command) => snapshot_command(db, command),
        Command::Stats => {
            let stats = snapshot::get_stats(db)?;
            println!("Database '{}'", stats.database);
            for (name, count) in &stats.counts {
                println!("  {:<24} {}", name, count);
            }
            println!("  {:<24} {}", "total", stats.total());
            Ok(())
        }
        Command::Clear { collection, force } => {
            let target = if collection == "all" {
                "every collection".to_string()
            } else {
                format!("collection '{}'", collection)
            };
            if !force && !confirm(&format!("Remove all documents from {} in '{}'?", target, db.name()))? {
                return Err(GraphError::DestructiveOpGuard(format!("clearing {} not confirmed", target)).into());
            }
            let removed = if collection == "all" {
                snapshot::clear_all(db)?
            } else {
                snapshot::clear_collection(db, &collection)?
            };
            println!("Cleared {} document(s) from {}", removed, target);
            Ok(())
        }
        Command::Drop { name, confirm } => {
            let dropped = snapshot::drop_database(db, &name, &confirm)?;
            println!("Dropped database '{}' ({} collection(s))", name, dropped);
            Ok(())
        }
    })
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
