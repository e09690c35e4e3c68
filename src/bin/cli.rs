//! Tessera CLI Client
//!
//! Command-line interface for interacting with a Tessera server.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tessera::client::{Event, TraceDirection};
use tessera::config::DEFAULT_PORT;
use tessera::protocol::Data;
use tessera::{ClientOptions, Connection, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Tessera CLI
#[derive(Parser, Debug)]
#[command(name = "tessera-cli")]
#[command(about = "CLI for the Tessera data-structure server")]
#[command(version)]
struct Args {
    /// Server host, or a local socket path starting with '/'
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for an answer (0 = forever)
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Print every frame in X1 form to stderr
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server
    Ping {
        #[arg(default_value = "ping")]
        value: String,
    },

    /// Create a container
    Create {
        name: String,
        #[arg(default_value = "volatile_list")]
        container_type: String,
    },

    /// Append a value to a list
    PushBack {
        container: String,
        value: String,
        metadata: Option<String>,
    },

    /// Set a key in a map (integer keys index lists)
    Set {
        container: String,
        key: String,
        value: String,
        metadata: Option<String>,
    },

    /// Get one record
    Get { container: String, key: String },

    /// Number of records
    Count { container: String },

    /// List records, optionally filtered by a key regex
    Query {
        container: String,
        #[arg(default_value = "0")]
        start: i32,
        #[arg(default_value = "0")]
        end: i32,
        #[arg(short, long)]
        expression: Option<String>,
    },

    /// Print events of a container until interrupted
    Subscribe {
        container: String,
        /// Replay from this record first
        #[arg(short, long)]
        start: Option<String>,
    },

    /// Add a container to a group
    GroupAdd { group: String, container: String },

    /// Print events of every member of a group until interrupted
    GroupSubscribe {
        group: String,
        #[arg(short, long)]
        start: Option<String>,
    },
}

/// Integers go over the wire as ints, everything else as strings
fn key_data(key: &str) -> Data {
    key.parse::<i32>().map(Data::Int).unwrap_or_else(|_| Data::from(key))
}

fn print_event(event: &Event) {
    println!(
        "{} {} key={} value={} metadata={}",
        event.container_name,
        event.event_code.name(),
        event.key,
        event.value,
        event.metadata
    );
}

fn run(args: Args) -> Result<()> {
    let options = ClientOptions {
        answer_timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        ..ClientOptions::default()
    };
    let mut connection = Connection::connect(&args.host, args.port, options)?;
    if args.trace {
        connection.set_trace_hook(Box::new(|link, direction, dump| {
            let arrow = match direction {
                TraceDirection::Sent => "->",
                TraceDirection::Received => "<-",
            };
            eprintln!("{} {} {}", link, arrow, String::from_utf8_lossy(dump));
        }));
    }

    match args.command {
        Commands::Ping { value } => {
            println!("{}", connection.ping(value.as_str())?);
        }
        Commands::Create { name, container_type } => {
            let handle = connection.create(&name, Some(&container_type))?;
            println!("created {} ({})", name, connection.container_type(handle).unwrap_or_default());
        }
        Commands::PushBack { container, value, metadata } => {
            let handle = connection.open(&container, None)?;
            connection.push_back(handle, value.as_str(), metadata.map(Data::from).unwrap_or_default())?;
            println!("ok");
        }
        Commands::Set { container, key, value, metadata } => {
            let handle = connection.open(&container, None)?;
            connection.set(handle, key_data(&key), value.as_str(), metadata.map(Data::from).unwrap_or_default())?;
            println!("ok");
        }
        Commands::Get { container, key } => {
            let handle = connection.open(&container, None)?;
            let record = connection.get(handle, key_data(&key))?;
            println!("{} {}", record.value, record.metadata);
        }
        Commands::Count { container } => {
            let handle = connection.open(&container, None)?;
            println!("{}", connection.count(handle)?);
        }
        Commands::Query { container, start, end, expression } => {
            let handle = connection.open(&container, None)?;
            for record in connection.query(handle, start, end, expression.as_deref())? {
                println!("{} {} {}", record.key, record.value, record.metadata);
            }
        }
        Commands::Subscribe { container, start } => {
            let handle = connection.open(&container, None)?;
            connection.subscribe(handle, start.map(|s| key_data(&s)), print_event)?;
            loop {
                connection.receive_next_pending_event(None)?;
            }
        }
        Commands::GroupAdd { group, container } => {
            connection.group_add(&group, &container)?;
            println!("ok");
        }
        Commands::GroupSubscribe { group, start } => {
            connection.group_subscribe(&group, start.as_deref(), print_event)?;
            loop {
                connection.receive_next_pending_event(None)?;
            }
        }
    }

    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
