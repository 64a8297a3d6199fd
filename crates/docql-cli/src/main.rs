//! docql CLI: scan a JSON-lines table through the cursor protocol.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docql_core::config::EngineConfig;
use docql_core::datum::Datum;
use docql_core::id::CursorToken;
use docql_core::signal::Interruptor;
use docql_exec::Engine;
use docql_io::jsonl;
use docql_io::metadata::{ClusterMetadata, MetadataView};
use docql_io::MemoryStore;
use docql_operators::{Func, Table, Value};

#[derive(Parser)]
#[command(name = "docql")]
#[command(about = "docql: document query engine with server-side cursors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a JSON-lines file as a table and stream it back in chunks
    Scan {
        /// Path to the JSON-lines data file
        #[arg(short, long)]
        data: PathBuf,

        /// Table name
        #[arg(long, default_value = "data")]
        table: String,

        /// Primary key attribute
        #[arg(long, default_value = "id")]
        pkey: String,

        /// Documents per response (overrides DOCQL_MAX_CHUNK_SIZE)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Keep rows whose FIELD equals the JSON value, e.g. `age=30`
        #[arg(long)]
        filter: Option<String>,

        /// Print the number of matching rows instead of the rows
        #[arg(long)]
        count: bool,
    },
}

struct ScanArgs {
    data: PathBuf,
    table: String,
    pkey: String,
    chunk_size: Option<usize>,
    filter: Option<(String, Datum)>,
    count: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan {
            data,
            table,
            pkey,
            chunk_size,
            filter,
            count,
        } => {
            let filter = match filter.as_deref().map(parse_filter).transpose() {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(2);
                }
            };
            let args = ScanArgs {
                data,
                table,
                pkey,
                chunk_size,
                filter,
                count,
            };
            if let Err(e) = scan(&args) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Split `FIELD=JSON` into the field name and the parsed value.
fn parse_filter(spec: &str) -> Result<(String, Datum), String> {
    let (field, raw) = spec
        .split_once('=')
        .ok_or_else(|| format!("filter `{spec}` must look like FIELD=JSON"))?;
    if field.is_empty() {
        return Err(format!("filter `{spec}` has an empty field name"));
    }
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("filter value `{raw}`: {e}"))?;
    Ok((field.to_string(), Datum::from(value)))
}

fn scan(args: &ScanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let rows = jsonl::read_path(&args.data.to_string_lossy())?;

    let mut meta = ClusterMetadata::default();
    let db = meta.add_database("cli");
    let table_id = meta.add_table(db, &args.table, &args.pkey);
    let store = MemoryStore::new();
    store.create_table(table_id, &args.pkey)?;
    let loaded = store.load(table_id, rows)?;
    tracing::info!(rows = loaded, table = %args.table, "loaded table");

    let mut config = EngineConfig::from_env();
    if let Some(n) = args.chunk_size {
        config.max_chunk_size = n;
    }
    let mut engine = Engine::new(config, Arc::new(store), MetadataView::new(meta))?;

    let token = CursorToken::new(1);
    let interruptor = Interruptor::new();
    let mut response = engine.start(token, BTreeMap::new(), &interruptor, |env| {
        let table = Table::open(env, db, &args.table)?;
        let mut stream = table.as_datum_stream(env)?;
        if let Some((field, value)) = &args.filter {
            stream = stream.filter(Func::field_eq(env, field, value.clone())?);
        }
        if args.count {
            return Ok(Value::Datum(stream.count(env)?));
        }
        Ok(Value::Sequence(stream))
    });

    loop {
        println!("{}", response.to_json_line()?);
        if response.is_final() {
            break;
        }
        response = engine.continue_query(token, &interruptor);
    }
    Ok(())
}
