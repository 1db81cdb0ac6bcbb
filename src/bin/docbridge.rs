use clap::{Parser, Subcommand};
use docbridge::cli::{self as prog_cli, Command, parse_output_mode};
use docbridge::config::ClientConfig;
use docbridge::server::MemoryServer;
use docbridge::utils::logger;
use docbridge::Operator;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "docbridge", version, about = "Document store client over the OP_MSG wire protocol", long_about = None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML). Standard locations are searched as well.")]
    config: Option<PathBuf>,
    #[arg(long, help = "Connection string, e.g. mongodb://localhost:27017/")]
    uri: Option<String>,
    #[arg(long, help = "Database name")]
    db: Option<String>,
    #[arg(long, help = "Collection name")]
    collection: Option<String>,
    #[arg(long, help = "Output format: human, plain or json")]
    format: Option<String>,
    #[arg(long, help = "Log level: error, warn, info, debug or trace")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Count documents matching a filter")]
    Count {
        #[arg(default_value = "{}")]
        filter: String,
    },
    #[command(about = "Print documents matching a filter, one JSON object per line")]
    Find {
        #[arg(default_value = "{}")]
        filter: String,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        skip: Option<u64>,
        #[arg(long)]
        batch_size: Option<u32>,
        #[arg(long, help = "Sort document, e.g. '{\"n\": -1}'")]
        sort: Option<String>,
        #[arg(long, help = "Projection document, e.g. '{\"name\": 1}'")]
        projection: Option<String>,
    },
    #[command(about = "Insert one document")]
    Insert { document: String },
    #[command(about = "Set fields on the first matching document, inserting it when none matches")]
    Update { filter: String, body: String },
    #[command(about = "Delete one matching document, or all documents with --all")]
    Remove {
        filter: Option<String>,
        #[arg(long, conflicts_with = "filter")]
        all: bool,
    },
    #[command(name = "create-index", about = "Create a single-field index (ascending and unique by default)")]
    CreateIndex {
        key: String,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        non_unique: bool,
    },
    #[command(about = "Run an in-memory server for local development")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:27017")]
        addr: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut cfg = match ClientConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    // Flags beat files and environment.
    cfg.uri = cli.uri.or(cfg.uri);
    cfg.database = cli.db.or(cfg.database);
    cfg.collection = cli.collection.or(cfg.collection);
    cfg.log_level = cli.log_level.or(cfg.log_level);

    let logging = match &cfg.log_dir {
        Some(dir) => logger::configure_logging(Some(dir.as_path()), cfg.log_level.as_deref(), cfg.log_retention),
        None => logger::init_console(Some(cfg.log_level.as_deref().unwrap_or("warn"))),
    };
    if let Err(e) = logging {
        eprintln!("warning: logging disabled: {e}");
    }

    let cmd = match cli.command {
        Commands::Serve { addr } => return serve(&addr),
        Commands::Count { filter } => Command::Count { filter },
        Commands::Find { filter, limit, skip, batch_size, sort, projection } => {
            Command::Find { filter, limit, skip, batch_size, sort, projection }
        }
        Commands::Insert { document } => Command::Insert { document },
        Commands::Update { filter, body } => Command::Update { filter, body },
        Commands::Remove { all: true, .. } => Command::RemoveAll,
        Commands::Remove { filter: Some(filter), .. } => Command::Remove { filter },
        Commands::Remove { filter: None, .. } => {
            eprintln!("error: remove needs a filter, or --all to delete every document");
            return ExitCode::FAILURE;
        }
        Commands::CreateIndex { key, desc, non_unique } => {
            Command::CreateIndex { key, ascending: !desc, unique: !non_unique }
        }
    };

    let mut op = match Operator::from_config(&cfg) {
        Ok(op) => op,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mode = parse_output_mode(cli.format.as_deref());
    let result = prog_cli::run_with_format(&mut op, cmd, mode, &mut std::io::stdout().lock());
    op.close();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn serve(addr: &str) -> ExitCode {
    let server = match MemoryServer::start_on(addr) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot listen on {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("listening on {}", server.uri());
    let waited = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .and_then(|rt| rt.block_on(tokio::signal::ctrl_c()));
    server.shutdown();
    match waited {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
