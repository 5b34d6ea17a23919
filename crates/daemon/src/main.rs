/// OnionNet Daemon
///
/// Runs one role of the overlay:
/// - `master`: directory, key issuance and circuit selection
/// - `router`: peels one onion layer per message and forwards it
/// - `client`: interactive messaging over the overlay

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use onionnet_common::OverlayConfig;
use onionnet_core::{
    ClientAgent, ClientHandlers, DirectoryStore, InboundMessage, JsonFileStore, MasterServer,
    NullStore, RouterNode,
};

const CONFIG_FILE: &str = "onionnet.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let Some(command) = args.get(1) else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "help" | "--help" | "-h" => {
            print_help();
            return Ok(());
        }
        "version" | "--version" | "-v" => {
            println!("OnionNet v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config = load_config()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if config.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("Starting OnionNet v{}", env!("CARGO_PKG_VERSION"));

    match command.as_str() {
        "master" => run_master(config).await,
        "router" => run_router(config, args.get(2)).await,
        "client" => run_client(config, args.get(2), args.get(3)).await,
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Run with 'help' to see available commands");
            std::process::exit(1);
        }
    }
}

/// Load the config file, writing the defaults out if there is none
fn load_config() -> Result<OverlayConfig> {
    let path = PathBuf::from(CONFIG_FILE);
    if path.exists() {
        return OverlayConfig::from_file(&path).with_context(|| format!("loading {:?}", path));
    }

    let config = OverlayConfig::default();
    if let Err(e) = config.to_file(&path) {
        eprintln!("Failed to save default config: {}", e);
    }
    Ok(config)
}

async fn run_master(config: OverlayConfig) -> Result<()> {
    let store: Arc<dyn DirectoryStore> = match &config.master.store_path {
        Some(path) => {
            info!("Mirroring directory to {:?}", path);
            Arc::new(JsonFileStore::open(path)?)
        }
        None => Arc::new(NullStore),
    };

    let server = MasterServer::bind(&config.master, config.crypto, store).await?;
    info!("Master is running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

async fn run_router(config: OverlayConfig, port: Option<&String>) -> Result<()> {
    let mut router_config = config.router;
    if let Some(port) = port {
        router_config = router_config.with_port(port.parse().context("invalid port")?);
    }

    let node = Arc::new(RouterNode::start(router_config).await?);
    info!("Router {} is running on {}. Press Ctrl+C to stop.", node.id(), node.address());

    tokio::select! {
        _ = node.clone().run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        }
    }

    if let Err(e) = node.unregister().await {
        warn!("Failed to unregister: {}", e);
    }

    info!("Router stopped");
    Ok(())
}

async fn run_client(
    config: OverlayConfig,
    username: Option<&String>,
    port: Option<&String>,
) -> Result<()> {
    let mut client_config = config.client;
    if let Some(username) = username {
        client_config.username = username.clone();
    }
    if let Some(port) = port {
        client_config = client_config.with_port(port.parse().context("invalid port")?);
    }
    if client_config.username.is_empty() {
        bail!("a username is required: onionnet client <username> [port]");
    }

    let hops = client_config.default_hops as i64;
    let handlers = ClientHandlers::new().on_message(|message: InboundMessage| {
        println!("[{}] {}", message.sender, message.body);
    });
    let agent = ClientAgent::register(client_config, handlers).await?;

    println!("Registered as '{}' on {}", agent.username(), agent.address());
    println!("Commands: /list, /msg <user> <text>, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !agent.is_running() {
            println!("Connection to master lost");
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "/quit" {
            break;
        } else if line == "/list" {
            match agent.list_users().await {
                Ok(users) if users.is_empty() => println!("No other users online"),
                Ok(users) => println!("Online: {}", users.join(", ")),
                Err(e) => println!("Error: {}", e),
            }
        } else if let Some(rest) = line.strip_prefix("/msg ") {
            let Some((target, text)) = rest.trim_start().split_once(' ') else {
                println!("Usage: /msg <user> <text>");
                continue;
            };
            match agent.send_message(target, text, hops).await {
                Ok(receipt) => println!("Sent via {} hop(s)", receipt.hops),
                Err(e) => println!("Error: {}", e),
            }
        } else {
            println!("Unknown command: {}", line);
        }
    }

    agent.stop().await;
    Ok(())
}

/// Print help message
fn print_help() {
    println!("OnionNet - onion-routed messaging overlay");
    println!();
    println!("USAGE:");
    println!("    onionnet <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    master                      Run the directory and circuit server");
    println!("    router [port]               Run a relay and register it with the master");
    println!("    client <username> [port]    Register a user and chat interactively");
    println!("    help                        Show this help message");
    println!("    version                     Show version information");
    println!();
    println!("CONFIGURATION:");
    println!("    Read from ./{} (written with defaults on first run)", CONFIG_FILE);
    println!();
    println!("CLIENT COMMANDS:");
    println!("    /list                       Show other online users");
    println!("    /msg <user> <text>          Send a message through a fresh circuit");
    println!("    /quit                       Unregister and exit");
}
