use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use fanfetch_engine::{EngineConfig, WorkerPool, load_config, load_task_file};
use tracing::info;

mod server;

use server::TaskService;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();
    let mut config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    if matches.get_flag("daemon") {
        return run_server(&mut config, &matches).await;
    }
    match matches.subcommand() {
        Some(("run", sub)) => run_file(&mut config, sub).await,
        Some(("serve", sub)) => run_server(&mut config, sub).await,
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn workers_arg() -> Arg {
    Arg::new("workers")
        .long("workers")
        .short('w')
        .global(true)
        .action(ArgAction::Set)
        .value_parser(value_parser!(usize))
        .help("Number of concurrent workers")
}

fn listen_arg() -> Arg {
    Arg::new("listen")
        .long("listen")
        .short('l')
        .global(true)
        .action(ArgAction::Set)
        .help("Address the task server binds to")
}

fn build_cli() -> Command {
    Command::new("fanfetch")
        .about("Run staged HTTP fan-out tasks")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the engine configuration file"),
        )
        .arg(
            Arg::new("daemon")
                .long("daemon")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Run as a task server (same as `serve`)"),
        )
        .arg(workers_arg())
        .arg(listen_arg())
        .subcommand(
            Command::new("run")
                .about("Run a task file and print the resulting environments")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .short('f')
                        .required(true)
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(PathBuf))
                        .help("Task file (JSON, or YAML with a .yaml/.yml extension)"),
                ),
        )
        .subcommand(Command::new("serve").about("Accept tasks over HTTP"))
}

fn apply_overrides(config: &mut EngineConfig, matches: &ArgMatches) {
    // Global args propagate, so subcommand matches see top-level values too.
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.workers = *workers;
    }
    if let Some(listen) = matches.get_one::<String>("listen") {
        config.listen_address = listen.clone();
    }
}

async fn run_file(config: &mut EngineConfig, matches: &ArgMatches) -> Result<()> {
    apply_overrides(config, matches);
    let path = matches.get_one::<PathBuf>("json").context("missing --json task file")?;
    let spec = load_task_file(path)?;

    let pool = WorkerPool::start(config.workers);
    let service = TaskService::new(pool.clone(), config.default_plugins.clone());
    let report = service.run(spec).await;
    pool.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_server(config: &mut EngineConfig, matches: &ArgMatches) -> Result<()> {
    apply_overrides(config, matches);
    let address: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address '{}'", config.listen_address))?;

    let pool = WorkerPool::start(config.workers);
    let service = TaskService::new(pool.clone(), config.default_plugins.clone());
    server::serve(address, service, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await?;
    pool.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn top_level_overrides_reach_subcommands() {
        let matches = build_cli()
            .try_get_matches_from(["fanfetch", "--workers", "3", "--listen", "0.0.0.0:9000", "run", "--json", "task.json"])
            .expect("parse");
        let (_, sub) = matches.subcommand().expect("subcommand");

        let mut config = EngineConfig::default();
        apply_overrides(&mut config, sub);
        assert_eq!(config.workers, 3);
        assert_eq!(config.listen_address, "0.0.0.0:9000");
    }

    #[test]
    fn subcommand_overrides_apply() {
        let matches = build_cli()
            .try_get_matches_from(["fanfetch", "serve", "-w", "5"])
            .expect("parse");
        let (_, sub) = matches.subcommand().expect("subcommand");

        let mut config = EngineConfig::default();
        apply_overrides(&mut config, sub);
        assert_eq!(config.workers, 5);
        assert_eq!(config.listen_address, EngineConfig::default().listen_address);
    }
}
