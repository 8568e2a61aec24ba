//! lidlink-cli: offline inspection and repair of the LID mapping snapshot.
//!
//! Every command opens the snapshot named by the resolved config, acts on it
//! and, for mutating commands, writes it back before exiting. Run it while
//! the daemon is stopped, or the daemon's next flush will overwrite edits.

use clap::{Parser, Subcommand};
use lidlink::engine::config::load_config_file;
use lidlink::{load_config, EngineError, EngineResult, IdentityEngine, Observation, ResolverConfig};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lidlink-cli")]
#[command(about = "Inspect and repair lidlink LID ⇄ phone mappings")]
struct Cli {
    /// TOML config file
    #[arg(short, long, value_name = "PATH", env = "LIDLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the snapshot (overrides the config file)
    #[arg(long, value_name = "DIR", env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Print JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mapping, name and pending counts
    Stats,
    /// Resolve a LID (or phone number) to its phone number
    Resolve { id: String },
    /// Find the LID bound to a phone number
    Reverse { canonical: String },
    /// Every display name seen for an identifier
    Names { id: String },
    /// List mappings, or identifiers sharing one display name
    Mappings {
        #[arg(long)]
        push_name: Option<String>,
    },
    /// Bind a LID to a phone number, displacing conflicting mappings
    ForceMap {
        lid: String,
        phone: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Replay observations from a JSON-lines file (one event per line)
    Replay { file: PathBuf },
    /// Delete every mapping and the snapshot file
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> EngineResult<ResolverConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => load_config()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> EngineResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn run(cli: Cli) -> EngineResult<()> {
    let config = resolve_config(&cli)?;
    let engine = IdentityEngine::open(&config);
    let json = cli.json;

    match cli.command {
        Command::Stats => {
            let stats = engine.stats();
            emit(json, &stats, || {
                format!(
                    "mappings:    {}\npending:     {}\nnames:       {}\nidentifiers: {}\nsnapshot:    {}",
                    stats.total_mappings,
                    stats.pending_contacts,
                    stats.total_names,
                    stats.total_identifiers,
                    engine.snapshot_path().display()
                )
            })
        }
        Command::Resolve { id } => {
            let resolved = engine.resolve(&id).map(|c| c.to_jid());
            emit(json, &resolved, || resolved.clone().unwrap_or_else(|| "(unresolved)".into()))
        }
        Command::Reverse { canonical } => {
            let lid = engine.reverse_lookup(&canonical).map(|p| p.to_jid());
            emit(json, &lid, || lid.clone().unwrap_or_else(|| "(no LID)".into()))
        }
        Command::Names { id } => {
            let names = engine.names_for(&id);
            emit(json, &names, || names.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
        Command::Mappings { push_name: Some(name) } => {
            let entry = engine.identifiers_for_name(&name);
            let ids: Vec<String> = entry
                .canonical
                .iter()
                .chain(entry.pseudonymous.iter())
                .map(|id| id.to_jid())
                .collect();
            emit(json, &ids, || ids.join("\n"))
        }
        Command::Mappings { push_name: None } => {
            let mappings = engine.mappings();
            emit(json, &mappings, || {
                mappings
                    .iter()
                    .map(|m| format!("{} → {}  ({}, {})", m.pseudonymous, m.canonical, m.source, m.created_at.to_rfc3339()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::ForceMap { lid, phone, name } => {
            let mapping = engine.force_map(&lid, &phone, name.as_deref())?;
            engine.flush_now()?;
            emit(json, &mapping, || format!("{} → {}", mapping.pseudonymous, mapping.canonical))
        }
        Command::Replay { file } => {
            let observations = read_observations(&file)?;
            let created = engine.ingest_history(observations);
            engine.flush()?;
            emit(json, &created, || format!("{} new mappings", created))
        }
        Command::Clear { yes } => {
            if !yes {
                return Err(EngineError::Other("refusing to clear without --yes".into()));
            }
            engine.clear()?;
            emit(json, &true, || "cleared".into())
        }
    }
}

/// One `Observation` per line; blank lines and `#` comments are skipped.
fn read_observations(path: &PathBuf) -> EngineResult<Vec<Observation>> {
    let file = std::fs::File::open(path)?;
    let mut out = Vec::new();
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let obs: Observation = serde_json::from_str(trimmed)
            .map_err(|e| EngineError::Other(format!("{}:{}: {}", path.display(), lineno + 1, e)))?;
        out.push(obs);
    }
    Ok(out)
}
