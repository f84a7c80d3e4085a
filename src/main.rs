use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hearth::{BodyValue, HandlerEntry, HandlerScope, Server, ServerConfig, StaticFiles};

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Single-threaded HTTP/1.1 server with SSE pub/sub", long_about = None)]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value_t = 4040)]
    port: u16,

    /// Directory tree to serve as static files
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Leading path component to strip from static URIs
    #[arg(long)]
    static_stem: Option<String>,
}

#[derive(Serialize)]
struct StatusReport {
    server: &'static str,
    version: &'static str,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut server = Server::new(ServerConfig::from_env())?;

    server.register(
        "root",
        HandlerEntry::json(Vec::new(), |_scope: &mut HandlerScope| {
            let report = StatusReport {
                server: "hearth",
                version: env!("CARGO_PKG_VERSION"),
            };
            Ok(BodyValue::Json(serde_json::to_value(report)?))
        }),
    );

    if let Some(dir) = &cli.static_dir {
        let mut tree = StaticFiles::new(dir);
        if let Some(stem) = &cli.static_stem {
            tree = tree.with_stem(stem);
        }
        let mounted = tree.register(&mut server)?;
        info!(files = mounted, "static files registered");
    }

    server.start((cli.host.as_str(), cli.port))
}
