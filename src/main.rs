use cluster_node::error::NodeError;
use cluster_node::membership::types::{ServerDescriptor, ServerId};
use cluster_node::node::config::NodeConfig;
use cluster_node::node::lifecycle::Node;
use cluster_node::protocol::package::PackageHandler;
use cluster_node::protocol::rpc::RpcServer;
use std::sync::Arc;

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} [--config <file.toml>] [--id <id>] [--host <host>] [--port <port>] [--frontend] [--master <id@host:port>]",
        program
    );
    eprintln!("Example: {} --host 127.0.0.1 --port 9000", program);
    eprintln!(
        "Example: {} --id gate-1 --port 3250 --frontend --master master@127.0.0.1:9000",
        program
    );

    std::process::exit(1);
}

/// Command line overrides. Anything left unset falls back to the config file or defaults.
#[derive(Default)]
struct Args {
    config: Option<String>,
    id: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    frontend: bool,
    master: Option<String>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut parsed = Args::default();

    let value = |i: usize| -> String {
        match args.get(i + 1) {
            Some(v) => v.clone(),
            None => usage(&args[0]),
        }
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                parsed.config = Some(value(i));
                i += 2;
            }
            "--id" => {
                parsed.id = Some(value(i));
                i += 2;
            }
            "--host" => {
                parsed.host = Some(value(i));
                i += 2;
            }
            "--port" => {
                parsed.port = Some(value(i).parse()?);
                i += 2;
            }
            "--master" => {
                parsed.master = Some(value(i));
                i += 2;
            }
            "--frontend" => {
                parsed.frontend = true;
                i += 1;
            }
            "--help" | "-h" => usage(&args[0]),
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    Ok(parsed)
}

fn build_config(args: Args) -> anyhow::Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::new(ServerDescriptor::new(
            ServerId::generate(),
            "127.0.0.1",
            9000,
            false,
        )),
    };

    if let Some(id) = args.id {
        config.server.id = ServerId::from(id);
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.frontend {
        config.server.is_frontend = true;
    }
    if let Some(master) = args.master {
        config.master = Some(ServerDescriptor::parse_compact(&master, false)?);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = build_config(parse_args(&args)?)?;

    tracing::info!("Node ID: {}", config.server.id);
    match &config.master {
        Some(master) => tracing::info!("Master server: {}", master),
        None => tracing::info!("Starting without a master server"),
    }

    let node = Node::new(config);
    let rpc = Arc::new(RpcServer::new());
    let handler = Arc::new(PackageHandler::new(node.producer()));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
    };

    match node.run(rpc, handler, shutdown).await {
        Ok(membership) => {
            for server in membership.snapshot() {
                tracing::info!("Known at shutdown: {}", server);
            }
            Ok(())
        }
        Err(e @ NodeError::Bind { .. }) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}
