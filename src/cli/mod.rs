//! Command line entry: load the policy, wire the server, run the stdio loop.

use crate::plugins::bugtracker::BugTrackerPlugin;
use crate::plugins::websearch::WebSearchPlugin;
use crate::policy::load_policy;
use crate::protocol::transport::Transport;
use crate::server::McpServer;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

/// Exit code for SIGINT, per shell convention.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "toolgate", version, about = "Security-first local MCP tool gateway")]
pub struct Cli {
    /// Path to the security policy YAML file
    #[arg(short, long, default_value = "config/policy.yaml")]
    policy: PathBuf,
}

pub async fn run() -> u8 {
    let cli = Cli::parse();
    run_with_policy_path(&cli.policy).await
}

async fn run_with_policy_path(policy_path: &Path) -> u8 {
    let policy = match load_policy(policy_path) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let mut server = match McpServer::new(policy) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error loading server: {}", e);
            return 1;
        }
    };

    let engine = server.engine();
    server.register_plugin(Arc::new(WebSearchPlugin::new(Some(engine.clone()))));
    server.register_plugin(Arc::new(BugTrackerPlugin::new(Some(engine))));

    let mut transport = Transport::stdio();
    transport.log("MCP Secure Local Server started");
    transport.log(&format!("Policy loaded from: {}", policy_path.display()));

    let code = loop {
        let message = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                transport.log("Interrupted, shutting down");
                break EXIT_INTERRUPTED;
            }
            message = transport.read_message() => message,
        };

        let Some(message) = message else {
            transport.log("EOF received, shutting down");
            break 0;
        };

        match server.handle_message(&message).await {
            Ok(Some(response)) => {
                if let Err(e) = transport.write_message(&response).await {
                    error!("transport write failed: {}", e);
                    break 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                transport.log(&format!("Error: {}", e));
                break 1;
            }
        }
    };

    server.shutdown();
    code
}
