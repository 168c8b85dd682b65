//! Command-line front end for named SQL connections.
//!
//! Resolves a connection by name from `sqlconnect.yaml` and runs queries,
//! commands or CSV loads against it. Passwords are never printed.

use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlconnect::logging::init_logging;
use sqlconnect::{Connector, IfExists, InsertMethod, Result, SqlconnectError, Table, Value, WriteOptions};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "sqlconnect")]
#[command(about = "Run SQL against connections named in sqlconnect.yaml")]
#[command(version)]
#[command(long_about = "
sqlconnect - named, configuration-driven SQL connections

Connections are looked up by name under `connections:` in sqlconnect.yaml
(current directory first, then the home directory). Credentials are read
from the environment variables the entry names, optionally loaded from
sqlconnect.env.

EXAMPLES:
  sqlconnect Warehouse url
  sqlconnect Warehouse query 'SELECT * FROM employees'
  sqlconnect --config ./conf.yaml Warehouse exec --file migrate.sql
  sqlconnect Warehouse load --table people --if-exists replace people.csv
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Name of the connection entry
    connection: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Use this configuration file instead of searching for one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    verbose: u8,

    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the connection URL with the password masked
    Url,
    /// Run a query and print the rows
    Query(QueryArgs),
    /// Run a command inside a transaction
    Exec(ExecArgs),
    /// Load a CSV file into a table
    Load(LoadArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// SQL text
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    sql: Option<String>,

    /// Read the SQL from this file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Fetch and print rows in chunks of this size
    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long, value_enum, default_value_t = Format::Csv)]
    format: Format,
}

#[derive(Args)]
struct ExecArgs {
    /// SQL text
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    sql: Option<String>,

    /// Read the command from this file
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct LoadArgs {
    /// CSV file with a header row
    csv: PathBuf,

    /// Target table
    #[arg(long)]
    table: String,

    /// Target schema
    #[arg(long)]
    schema: Option<String>,

    #[arg(long, value_enum, default_value_t = IfExistsArg::Fail)]
    if_exists: IfExistsArg,

    /// Do not write the row index column
    #[arg(long)]
    no_index: bool,

    /// Rows per INSERT batch
    #[arg(long)]
    chunk_size: Option<NonZeroUsize>,

    /// Use multi-row INSERT statements
    #[arg(long)]
    multi: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum IfExistsArg {
    Fail,
    Replace,
    Append,
}

impl From<IfExistsArg> for IfExists {
    fn from(arg: IfExistsArg) -> Self {
        match arg {
            IfExistsArg::Fail => IfExists::Fail,
            IfExistsArg::Replace => IfExists::Replace,
            IfExistsArg::Append => IfExists::Append,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.global.verbose, cli.global.quiet) {
        eprintln!("{e}");
    }

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut builder = Connector::builder(&cli.connection);
    if let Some(path) = &cli.global.config {
        builder = builder.config_path(path);
    }

    if let Command::Url = cli.command {
        let descriptor = builder.resolve()?;
        println!("{}", descriptor.redacted_url());
        return Ok(());
    }

    let mut conn = builder.connect()?;
    let result = match &cli.command {
        Command::Url => Ok(()),
        Command::Query(args) => run_query(&mut conn, args),
        Command::Exec(args) => run_exec(&mut conn, args),
        Command::Load(args) => run_load(&mut conn, args),
    };
    conn.close();
    result
}

/// Where the SQL text comes from.
enum SqlSource<'a> {
    Text(&'a str),
    File(&'a PathBuf),
}

impl<'a> SqlSource<'a> {
    fn from_args(sql: &'a Option<String>, file: &'a Option<PathBuf>) -> Result<Self> {
        match (sql, file) {
            (_, Some(path)) => Ok(SqlSource::File(path)),
            (Some(sql), None) => Ok(SqlSource::Text(sql)),
            (None, None) => Err(SqlconnectError::InvalidArgument(
                "either SQL text or --file is required".to_string(),
            )),
        }
    }
}

fn run_query(conn: &mut Connector, args: &QueryArgs) -> Result<()> {
    let source = SqlSource::from_args(&args.sql, &args.file)?;
    let stdout = io::stdout();
    let mut printer = Printer::new(stdout.lock(), args.format);

    match (args.chunk_size, source) {
        (Some(size), SqlSource::Text(sql)) => conn.query_chunks(sql, size, |chunk| printer.print(&chunk))?,
        (Some(size), SqlSource::File(path)) => {
            conn.query_file_chunks(path, size, |chunk| printer.print(&chunk))?
        }
        (None, SqlSource::Text(sql)) => printer.print(&conn.query(sql)?)?,
        (None, SqlSource::File(path)) => printer.print(&conn.query_file(path)?)?,
    }
    printer.finish()
}

fn run_exec(conn: &mut Connector, args: &ExecArgs) -> Result<()> {
    match SqlSource::from_args(&args.sql, &args.file)? {
        SqlSource::Text(sql) => conn.execute(sql)?,
        SqlSource::File(path) => conn.execute_file(path)?,
    }
    info!("Command executed");
    Ok(())
}

/// Writes tables as CSV (one header) or JSON lines.
struct Printer<W: Write> {
    out: W,
    format: Format,
    header_written: bool,
}

impl<W: Write> Printer<W> {
    fn new(out: W, format: Format) -> Self {
        Printer {
            out,
            format,
            header_written: false,
        }
    }

    fn print(&mut self, table: &Table) -> Result<()> {
        match self.format {
            Format::Csv => {
                let mut writer = csv::WriterBuilder::new().from_writer(&mut self.out);
                if !self.header_written {
                    writer.write_record(&table.columns).map_err(csv_error)?;
                    self.header_written = true;
                }
                for row in &table.rows {
                    writer
                        .write_record(row.iter().map(ToString::to_string))
                        .map_err(csv_error)?;
                }
                writer.flush()?;
            }
            Format::Json => {
                for row in &table.rows {
                    let object: serde_json::Map<String, serde_json::Value> = table
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().map(json_value))
                        .collect();
                    serde_json::to_writer(&mut self.out, &object)
                        .map_err(|e| SqlconnectError::Io(e.into()))?;
                    writeln!(self.out)?;
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn csv_error(e: csv::Error) -> SqlconnectError {
    SqlconnectError::Io(e.into())
}

fn run_load(conn: &mut Connector, args: &LoadArgs) -> Result<()> {
    let table = read_csv(&args.csv)?;

    let mut options = WriteOptions::default()
        .if_exists(args.if_exists.into())
        .index(!args.no_index);
    if let Some(schema) = &args.schema {
        options = options.schema(schema);
    }
    if let Some(size) = args.chunk_size {
        options = options.chunk_size(size);
    }
    if args.multi {
        options = options.method(InsertMethod::Multi);
    }

    let written = conn.write_table(&table, &args.table, &options)?;
    match written {
        Some(rows) => info!("Loaded {} rows into {}", rows, args.table),
        None => info!("Loaded {} into {}", args.csv.display(), args.table),
    }
    Ok(())
}

/// Reads a headed CSV file; cells are inferred (integer, real, empty as
/// null, otherwise text).
fn read_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        SqlconnectError::execution(format!("Failed to read CSV file {}", path.display()), csv_error(e))
    })?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    let mut table = Table::with_columns(headers.iter());
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        table.push_row(record.iter().map(Value::infer).collect());
    }
    Ok(table)
}
