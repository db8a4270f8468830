//! pbstore shell
//!
//! Loads the schema directory and runs store commands against an in-memory
//! key space, one command per line.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pbstore::{commands, DynamicMessage, Format, Reply, SchemaRegistry, StoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pb-shell")]
#[command(about = "Interactive shell over schema-typed protobuf records")]
struct Cli {
    /// Config file (defaults to pbstore.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Schema directory, overrides the config file
    #[arg(short = 'd', long)]
    proto_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read commands from stdin (default)
    Repl,

    /// Load the schema directory and report what was registered
    Check,

    /// List registered message types
    Types {
        /// Only types whose name contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Print the schema of one type
    Schema { type_name: String },

    /// Show every accepted schema file as JSON
    Files,

    /// Write the effective configuration as TOML
    Config {
        #[arg(short, long, default_value = "pbstore.toml")]
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli, config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config =
        StoreConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = &cli.proto_dir {
        config.registry.proto_dir = dir.clone();
    }
    Ok(config)
}

fn run(cli: Cli, config: StoreConfig) -> anyhow::Result<()> {
    if let Some(Commands::Config { output }) = &cli.command {
        config.save(output)?;
        println!("Wrote {}", output);
        return Ok(());
    }

    let registry = SchemaRegistry::open(&config)?;

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Repl => repl(&registry),

        Commands::Check => {
            println!(
                "{} files, {} types in {}",
                registry.loaded_files().len(),
                registry.type_names().len(),
                registry.root().display()
            );
            Ok(())
        }

        Commands::Types { filter } => {
            for name in registry.type_names() {
                if filter.as_deref().map_or(true, |f| name.contains(f)) {
                    println!("{}", name);
                }
            }
            Ok(())
        }

        Commands::Schema { type_name } => match registry.schema_text(&type_name) {
            Some(text) => {
                print!("{}", text);
                Ok(())
            }
            None => bail!("unknown type: {}", type_name),
        },

        Commands::Files => {
            println!("{}", serde_json::to_string_pretty(&registry.loaded_files())?);
            Ok(())
        }

        Commands::Config { .. } => Ok(()),
    }
}

fn repl(registry: &SchemaRegistry) -> anyhow::Result<()> {
    let mut keys: HashMap<String, DynamicMessage> = HashMap::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "pb> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let args = split_args(&line)?;
        if args.is_empty() {
            continue;
        }
        if args[0].eq_ignore_ascii_case("quit") || args[0].eq_ignore_ascii_case("exit") {
            break;
        }

        match execute(registry, &mut keys, &args) {
            Ok(reply) => writeln!(stdout, "{}", reply)?,
            Err(e) => writeln!(stdout, "(error) {:#}", e)?,
        }
    }

    Ok(())
}

/// Run one command line against the key space
fn execute(
    registry: &SchemaRegistry,
    keys: &mut HashMap<String, DynamicMessage>,
    args: &[String],
) -> anyhow::Result<Reply> {
    let verb = args[0].to_ascii_uppercase();
    let rest = &args[1..];

    let reply = match (verb.as_str(), rest) {
        ("TYPES", []) => Reply::Array(registry.type_names().into_iter().map(Reply::Str).collect()),
        ("SCHEMA", [type_name]) => commands::schema(registry, type_name),
        ("IMPORT", [filename, text]) => {
            let text = match text.strip_prefix('@') {
                Some(local) => std::fs::read_to_string(local)
                    .with_context(|| format!("failed to read {}", local))?,
                None => text.clone(),
            };
            commands::import(registry, filename, &text)?
        }
        ("LASTIMPORT", []) => commands::last_import(registry),
        ("TYPE", [key]) => commands::type_of(keys.get(key)),
        ("GET", [key, path]) => commands::get(keys.get(key), path, Format::Json)?,
        ("GET", [key, flag, format, path]) if flag.eq_ignore_ascii_case("--format") => {
            commands::get(keys.get(key), path, format.parse()?)?
        }
        ("LEN", [key, path]) => commands::len(keys.get(key), path)?,
        ("SET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            let assignments: Vec<(&str, &[u8])> = pairs
                .chunks(2)
                .map(|pair| (pair[0].as_str(), pair[1].as_bytes()))
                .collect();
            with_slot(keys, key, |slot| commands::set(registry, slot, &assignments))?
        }
        ("APPEND", [key, path, values @ ..]) if !values.is_empty() => {
            with_slot(keys, key, |slot| commands::append(registry, slot, path, values))?
        }
        ("MERGE", [key, path, value]) => {
            with_slot(keys, key, |slot| commands::merge(registry, slot, path, value.as_bytes()))?
        }
        ("DEL", [key, path]) => with_slot(keys, key, |slot| commands::del(slot, path))?,
        ("CLEAR", [key, path]) => with_slot(keys, key, |slot| commands::clear(slot, path))?,
        _ => bail!("unknown command or wrong number of arguments: {}", args.join(" ")),
    };

    Ok(reply)
}

/// Lend the key's slot to a verb and store whatever it leaves behind
fn with_slot<F>(keys: &mut HashMap<String, DynamicMessage>, key: &str, f: F) -> anyhow::Result<Reply>
where
    F: FnOnce(&mut Option<DynamicMessage>) -> pbstore::Result<Reply>,
{
    let mut slot = keys.remove(key);
    let result = f(&mut slot);
    if let Some(msg) = slot {
        keys.insert(key.to_string(), msg);
    }
    Ok(result?)
}

/// Whitespace-separated words; double quotes group, `\"` escapes
fn split_args(line: &str) -> anyhow::Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_word = false;
    let mut chars = line.trim().chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                has_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_word {
                    args.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            c => {
                current.push(c);
                has_word = true;
            }
        }
    }

    if in_quotes {
        bail!("unterminated quote");
    }
    if has_word {
        args.push(current);
    }
    Ok(args)
}
