use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use clinitree::db::{Database, DbError, Result};
use clinitree::{
    render_outline, tree_to_dot, AnswerUpdate, Config, DotConfig, NodeKind, Region, TreeBundle,
    TreeUpdate, ValidationReport,
};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Env var holding the tracing filter
const LOG_ENV: &str = "CLINITREE_LOG";

#[derive(Parser, Debug)]
#[command(name = "clinitree")]
#[command(author, version, about = "Clinical decision trees - build, browse and validate diagnostic pathways")]
struct Cli {
    /// Log store activity (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List topographic zones
    Zones,

    /// Show database location and schema versions
    Info,

    /// Manage decision trees
    #[command(subcommand)]
    Tree(TreeCommand),

    /// Manage nodes of a tree
    #[command(subcommand)]
    Node(NodeCommand),

    /// Manage answers of question nodes
    #[command(subcommand)]
    Answer(AnswerCommand),

    /// Check trees for structural defects (exit code 2 when any are found)
    Validate {
        /// Tree to check; all trees when omitted
        tree_id: Option<i32>,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export a tree as Graphviz DOT
    Dot {
        tree_id: i32,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Lay the graph out left to right
        #[arg(long)]
        lr: bool,

        /// Leave answer text off the edges
        #[arg(long)]
        no_answers: bool,

        /// Graph title (defaults to the tree name)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Export or import portable tree bundles
    #[command(subcommand)]
    Bundle(BundleCommand),

    /// Manage the reference catalog
    #[command(subcommand)]
    Catalog(CatalogCommand),

    /// Serve the JSON API
    Serve {
        /// Port to listen on (defaults to the config's server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum TreeCommand {
    /// Create a tree
    Add {
        /// Zone id or region name (e.g. cervical)
        zone: String,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List trees, optionally for one zone
    List {
        #[arg(short, long)]
        zone: Option<String>,
    },
    /// Print a tree as an outline
    Show {
        tree_id: i32,
        /// Print the tree with its nodes and answers as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a tree's name, description or zone
    Edit {
        tree_id: i32,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long)]
        clear_description: bool,
        #[arg(short, long)]
        zone: Option<String>,
    },
    /// Delete a tree with its nodes and answers
    Rm { tree_id: i32 },
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    /// Add a question node
    Question {
        tree_id: i32,
        text: String,
        #[arg(short, long)]
        parent: Option<i32>,
    },
    /// Add a diagnosis node
    Diagnosis {
        tree_id: i32,
        /// Pathology ids, comma separated
        #[arg(long, value_delimiter = ',')]
        pathologies: Vec<i32>,
        #[arg(short, long)]
        parent: Option<i32>,
    },
    /// Add a tests node
    Tests {
        tree_id: i32,
        /// Orthopedic test ids, comma separated
        #[arg(long, value_delimiter = ',')]
        tests: Vec<i32>,
        /// Test cluster ids, comma separated
        #[arg(long, value_delimiter = ',')]
        clusters: Vec<i32>,
        #[arg(short, long)]
        parent: Option<i32>,
    },
    /// Move a node and/or replace its content
    Edit {
        node_id: i32,
        /// New parent node
        #[arg(short, long, conflicts_with = "root")]
        parent: Option<i32>,
        /// Make the node a root
        #[arg(long)]
        root: bool,
        /// Turn into a question with this text
        #[arg(long, conflicts_with_all = ["pathologies", "tests", "clusters"])]
        text: Option<String>,
        /// Turn into a diagnosis with these pathology ids
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["tests", "clusters"])]
        pathologies: Option<Vec<i32>>,
        /// Turn into a tests node with these test ids
        #[arg(long, value_delimiter = ',')]
        tests: Option<Vec<i32>>,
        /// Turn into a tests node with these cluster ids
        #[arg(long, value_delimiter = ',')]
        clusters: Option<Vec<i32>>,
    },
    /// Delete a node with its descendants
    Rm { node_id: i32 },
}

#[derive(Subcommand, Debug)]
enum AnswerCommand {
    /// Attach an answer to a question node
    Add {
        node_id: i32,
        text: String,
        /// Node the answer leads to
        #[arg(short, long)]
        next: Option<i32>,
        /// Position among the node's answers (default: last)
        #[arg(short, long)]
        order: Option<i32>,
    },
    /// Change an answer
    Edit {
        answer_id: i32,
        #[arg(short, long)]
        text: Option<String>,
        #[arg(short, long)]
        order: Option<i32>,
        #[arg(short, long, conflicts_with = "clear_next")]
        next: Option<i32>,
        /// Detach the follow-up node
        #[arg(long)]
        clear_next: bool,
    },
    /// Delete an answer
    Rm { answer_id: i32 },
}

#[derive(Subcommand, Debug)]
enum BundleCommand {
    /// Write a tree as a JSON bundle
    Export {
        tree_id: i32,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Create a new tree from a JSON bundle
    Import {
        file: PathBuf,
        /// Zone id or region name, overriding the bundle's own
        #[arg(short, long)]
        zone: Option<String>,
        /// Check the bundle and report counts without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CatalogKind {
    Pathology,
    Test,
    Cluster,
}

#[derive(Subcommand, Debug)]
enum CatalogCommand {
    /// Add a catalog entry
    Add {
        #[arg(value_enum)]
        kind: CatalogKind,
        name: String,
        #[arg(short, long)]
        zone: Option<String>,
        /// Member test ids of a cluster, comma separated
        #[arg(long, value_delimiter = ',')]
        tests: Vec<i32>,
    },
    /// List catalog entries
    List {
        #[arg(value_enum)]
        kind: CatalogKind,
        #[arg(short, long)]
        zone: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Config is read before the real subscriber exists; keep its warnings
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(EnvFilter::new("warn"))
            .finish(),
        Config::load,
    );
    init_logging(cli.verbose, &config);

    match run(cli.command, &config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool, config: &Config) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.logging.filter))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Runs one command; the value is the process exit code
fn run(command: Command, config: &Config) -> Result<i32> {
    if let Command::Completion { shell } = command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "clinitree", &mut std::io::stdout());
        return Ok(0);
    }

    let db = config.open_database()?;

    match command {
        Command::Zones => {
            for zone in db.list_zones()? {
                println!("{:>3}  {:<12} {}", zone.id, zone.region.as_str(), zone.name);
            }
        }

        Command::Info => {
            println!("{} {}", "Database:".bold(), config.db_path().display());
            for schema in db.stored_schemas()? {
                println!("  schema {} ({}) since {}", schema.version, schema.name, schema.introduced_at);
            }
        }

        Command::Tree(cmd) => tree_command(&db, cmd)?,
        Command::Node(cmd) => node_command(&db, cmd)?,
        Command::Answer(cmd) => answer_command(&db, cmd)?,

        Command::Validate { tree_id, json } => {
            let options = config.validation_options(&db)?;
            let tree_ids = match tree_id {
                Some(id) => vec![id],
                None => db.list_trees(None)?.into_iter().map(|t| t.id).collect(),
            };
            let mut reports = Vec::with_capacity(tree_ids.len());
            for id in tree_ids {
                reports.push(db.validate_tree(id, &options)?);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    print_report(&db, report)?;
                }
            }
            if reports.iter().any(|r| !r.is_valid()) {
                return Ok(2);
            }
        }

        Command::Dot {
            tree_id,
            output,
            lr,
            no_answers,
            title,
        } => {
            let snapshot = db.load_snapshot(tree_id)?;
            let dot_config = DotConfig {
                title,
                show_answers: !no_answers,
                rankdir: if lr { "LR" } else { "TB" }.to_string(),
                ..Default::default()
            };
            let dot = tree_to_dot(&snapshot, &dot_config);
            match output {
                Some(path) => {
                    std::fs::write(&path, dot)?;
                    println!("{} {}", "Wrote".green(), path.display());
                }
                None => print!("{}", dot),
            }
        }

        Command::Bundle(BundleCommand::Export { tree_id, output }) => {
            let bundle = db.export_bundle(tree_id)?;
            match output {
                Some(path) => {
                    bundle.save(&path)?;
                    println!(
                        "{} tree {} ({} nodes, {} answers) to {}",
                        "Exported".green(),
                        tree_id,
                        bundle.nodes.len(),
                        bundle.answers.len(),
                        path.display()
                    );
                }
                None => println!("{}", serde_json::to_string_pretty(&bundle)?),
            }
        }

        Command::Bundle(BundleCommand::Import { file, zone, dry_run }) => {
            let bundle = TreeBundle::load(&file)?;
            let region = match zone {
                Some(zone) => Some(resolve_zone(&db, &zone).and_then(|id| db.get_zone(id))?.region),
                None => None,
            };
            let result = db.import_bundle(&bundle, region, dry_run)?;
            let verb = if dry_run { "Would import" } else { "Imported" };
            match result.tree_id {
                Some(id) => println!(
                    "{} tree {} ({} nodes, {} answers)",
                    verb.green(),
                    id,
                    result.nodes_added,
                    result.answers_added
                ),
                None => println!(
                    "{} {} nodes, {} answers",
                    verb.green(),
                    result.nodes_added,
                    result.answers_added
                ),
            }
            for note in &result.unresolved {
                println!("  {} {}", "unresolved:".yellow(), note);
            }
        }

        Command::Catalog(cmd) => catalog_command(&db, cmd)?,

        Command::Serve { port } => {
            let options = config.validation_options(&db)?;
            clinitree::serve::start_server(port.unwrap_or(config.server.port), db, options)?;
        }

        Command::Completion { .. } => {}
    }

    Ok(0)
}

/// Zone id, or a region name / label
fn resolve_zone(db: &Database, zone: &str) -> Result<i32> {
    if let Ok(id) = zone.parse::<i32>() {
        return Ok(db.get_zone(id)?.id);
    }
    let region = zone
        .parse::<Region>()
        .map_err(|e| DbError::Validation(e.to_string()))?;
    Ok(db.zone_by_region(region)?.id)
}

fn tree_command(db: &Database, cmd: TreeCommand) -> Result<()> {
    match cmd {
        TreeCommand::Add {
            zone,
            name,
            description,
        } => {
            let zone_id = resolve_zone(db, &zone)?;
            let id = db.create_tree(zone_id, &name, description.as_deref())?;
            println!("{} tree {}: {}", "Created".green(), id, name.trim());
        }

        TreeCommand::List { zone } => {
            let zone_id = zone.map(|z| resolve_zone(db, &z)).transpose()?;
            let zones = db.list_zones()?;
            let trees = db.list_trees(zone_id)?;
            if trees.is_empty() {
                println!("No trees.");
            }
            for tree in trees {
                let zone_name = zones
                    .iter()
                    .find(|z| z.id == tree.topographic_zone_id)
                    .map(|z| z.name.as_str())
                    .unwrap_or("?");
                println!("{:>4}  {:<12} {}", tree.id, zone_name, tree.name.bold());
            }
        }

        TreeCommand::Show { tree_id, json } => {
            let snapshot = db.load_snapshot(tree_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", render_outline(&snapshot));
            }
        }

        TreeCommand::Edit {
            tree_id,
            name,
            description,
            clear_description,
            zone,
        } => {
            let update = TreeUpdate {
                topographic_zone_id: zone.map(|z| resolve_zone(db, &z)).transpose()?,
                name,
                description: if clear_description {
                    Some(None)
                } else {
                    description.map(Some)
                },
            };
            db.update_tree(tree_id, &update)?;
            println!("{} tree {}", "Updated".green(), tree_id);
        }

        TreeCommand::Rm { tree_id } => {
            db.delete_tree(tree_id)?;
            println!("{} tree {}", "Deleted".green(), tree_id);
        }
    }
    Ok(())
}

fn node_command(db: &Database, cmd: NodeCommand) -> Result<()> {
    let (tree_id, parent, kind) = match cmd {
        NodeCommand::Question {
            tree_id,
            text,
            parent,
        } => (tree_id, parent, NodeKind::question(text)),
        NodeCommand::Diagnosis {
            tree_id,
            pathologies,
            parent,
        } => (tree_id, parent, NodeKind::diagnosis(pathologies)),
        NodeCommand::Tests {
            tree_id,
            tests,
            clusters,
            parent,
        } => (tree_id, parent, NodeKind::tests(tests, clusters)),

        NodeCommand::Edit {
            node_id,
            parent,
            root,
            text,
            pathologies,
            tests,
            clusters,
        } => {
            let parent_change = if root { Some(None) } else { parent.map(Some) };
            let kind = if let Some(text) = text {
                Some(NodeKind::question(text))
            } else if let Some(pathologies) = pathologies {
                Some(NodeKind::diagnosis(pathologies))
            } else if tests.is_some() || clusters.is_some() {
                Some(NodeKind::tests(
                    tests.unwrap_or_default(),
                    clusters.unwrap_or_default(),
                ))
            } else {
                None
            };
            db.update_node(node_id, parent_change, kind)?;
            println!("{} node {}", "Updated".green(), node_id);
            return Ok(());
        }

        NodeCommand::Rm { node_id } => {
            let removed = db.delete_node(node_id)?;
            println!("{} node {} ({} node(s) removed)", "Deleted".green(), node_id, removed);
            return Ok(());
        }
    };

    let node_type = kind.node_type();
    let id = db.create_node(tree_id, parent, kind)?;
    println!("{} {} node {}", "Created".green(), node_type, id);
    Ok(())
}

fn answer_command(db: &Database, cmd: AnswerCommand) -> Result<()> {
    match cmd {
        AnswerCommand::Add {
            node_id,
            text,
            next,
            order,
        } => {
            let id = db.create_answer(node_id, &text, order, next)?;
            println!("{} answer {} on node {}", "Created".green(), id, node_id);
        }

        AnswerCommand::Edit {
            answer_id,
            text,
            order,
            next,
            clear_next,
        } => {
            let update = AnswerUpdate {
                answer_text: text,
                display_order: order,
                next_node_id: if clear_next { Some(None) } else { next.map(Some) },
            };
            db.update_answer(answer_id, &update)?;
            println!("{} answer {}", "Updated".green(), answer_id);
        }

        AnswerCommand::Rm { answer_id } => {
            db.delete_answer(answer_id)?;
            println!("{} answer {}", "Deleted".green(), answer_id);
        }
    }
    Ok(())
}

fn catalog_command(db: &Database, cmd: CatalogCommand) -> Result<()> {
    match cmd {
        CatalogCommand::Add {
            kind,
            name,
            zone,
            tests,
        } => {
            let zone_id = zone.map(|z| resolve_zone(db, &z)).transpose()?;
            let (label, id) = match kind {
                CatalogKind::Pathology => ("pathology", db.create_pathology(&name, zone_id)?),
                CatalogKind::Test => ("test", db.create_test(&name, zone_id)?),
                CatalogKind::Cluster => ("cluster", db.create_cluster(&name, zone_id, &tests)?),
            };
            println!("{} {} {}: {}", "Created".green(), label, id, name.trim());
        }

        CatalogCommand::List { kind, zone } => {
            let zone_id = zone.map(|z| resolve_zone(db, &z)).transpose()?;
            match kind {
                CatalogKind::Pathology => {
                    for p in db.list_pathologies(zone_id)? {
                        println!("{:>4}  {}", p.id, p.name);
                    }
                }
                CatalogKind::Test => {
                    for t in db.list_tests(zone_id)? {
                        println!("{:>4}  {}", t.id, t.name);
                    }
                }
                CatalogKind::Cluster => {
                    for c in db.list_clusters(zone_id)? {
                        let ids: Vec<String> = c.test_ids.iter().map(|id| id.to_string()).collect();
                        println!("{:>4}  {} [{}]", c.id, c.name, ids.join(", "));
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_report(db: &Database, report: &ValidationReport) -> Result<()> {
    let tree = db.get_tree(report.tree_id)?;
    if report.is_valid() {
        println!("{} {} (tree {})", "✓".green(), tree.name, tree.id);
        return Ok(());
    }
    println!(
        "{} {} (tree {}): {} defect(s)",
        "✗".red(),
        tree.name,
        tree.id,
        report.errors().len()
    );
    for error in report.errors() {
        println!("    {}", error);
    }
    Ok(())
}
