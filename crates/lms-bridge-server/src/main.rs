//! LMS Bridge demo
//!
//! Wires an LMS page window and an embedded sidebar window together in
//! process and runs the bridge traffic a grading session produces.

use anyhow::{Context, Result};
use clap::Parser;
use lms_bridge_client::{CallOptions, Client};
use lms_bridge_core::models::BridgeConfig;
use lms_bridge_core::storage::{init_config_dir, ConfigStorage};
use lms_bridge_core::{FrameRef, InMemoryWindow};
use lms_bridge_server::client_rpc::{CHANGE_FOCUS_MODE_USER, REQUEST_CONFIG, REQUEST_GROUPS};
use lms_bridge_server::{ClientRpc, FocusedUser, Server};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "lms-bridge")]
#[command(about = "Cross-frame JSON-RPC bridge between an LMS page and its sidebar", long_about = None)]
struct Args {
    /// Origin of the LMS page
    #[arg(long, default_value = "http://localhost:8001")]
    lms_origin: String,

    /// Origin of the embedded sidebar
    #[arg(long, default_value = "http://localhost:5000")]
    sidebar_origin: String,

    /// Bridge config file (JSON, same keys as the page config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Timeout for sidebar calls in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .init();

    tracing::info!("LMS bridge starting...");
    tracing::info!("LMS origin: {}", args.lms_origin);
    tracing::info!("Sidebar origin: {}", args.sidebar_origin);
    tracing::info!("Allowed origins: {:?}", config.rpc_allowed_origins);

    run(&args, &config).await
}

/// Read the config file (`--config`, or `config.json` in the user config
/// dir) and apply the command line on top.
fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigStorage::load_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let storage = ConfigStorage::new(init_config_dir()?);
            storage.load().with_context(|| {
                format!("Failed to load config from {}", storage.path().display())
            })?
        }
    };

    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut BridgeConfig, args: &Args) {
    // The sidebar started by this binary must always be able to call in
    if !config.rpc_allowed_origins.contains(&args.sidebar_origin) {
        config.rpc_allowed_origins.push(args.sidebar_origin.clone());
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.call_timeout_ms = timeout_ms;
    }
}

async fn run(args: &Args, config: &BridgeConfig) -> Result<()> {
    let lms: FrameRef = InMemoryWindow::new(&args.lms_origin);
    let sidebar: FrameRef = InMemoryWindow::new(&args.sidebar_origin);

    // LMS side
    let client_config = json!({
        "services": [{
            "apiUrl": format!("{}/api/", args.sidebar_origin),
            "groups": format!("$rpc:{}", REQUEST_GROUPS),
        }],
    });
    let rpc = ClientRpc::new(
        lms.clone(),
        config.rpc_allowed_origins.iter().cloned(),
        client_config,
    );
    tracing::info!("LMS server methods: {:?}", rpc.server().methods());

    // Sidebar side
    let sidebar_server = Server::new(sidebar.clone(), [lms.origin().to_string()]);
    let (focus_tx, mut focus_rx) = mpsc::unbounded_channel::<Value>();
    sidebar_server.register_fn(CHANGE_FOCUS_MODE_USER, move |params: Vec<Value>| {
        let user = params.into_iter().next().unwrap_or(Value::Null);
        let _ = focus_tx.send(user);
        Ok::<_, Infallible>(Value::Null)
    });
    let client = Client::new(sidebar.clone()).with_timeout(config.call_timeout());

    let lms_origin = lms.origin().to_string();
    let client_config = client
        .call(&lms, &lms_origin, REQUEST_CONFIG, vec![])
        .await
        .context("requestConfig failed")?;
    println!("requestConfig -> {}", client_config);

    // Groups arrive from the backend after the sidebar has asked for them
    let groups_call = client.call(&lms, &lms_origin, REQUEST_GROUPS, vec![]);
    let provide_groups = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        rpc.set_groups(json!(["course-group", "section-a"]));
    };
    let (groups, ()) = tokio::join!(groups_call, provide_groups);
    println!("requestGroups -> {}", groups.context("requestGroups failed")?);

    let user = FocusedUser {
        username: "acct:student@lms.hypothes.is".to_string(),
        display_name: "Student One".to_string(),
        groups: vec!["section-a".to_string()],
    };
    rpc.set_focused_user(Some(&user)).await?;
    match tokio::time::timeout(config.call_timeout(), focus_rx.recv()).await {
        Ok(Some(focused)) => println!("changeFocusModeUser <- {}", focused),
        _ => tracing::warn!("Sidebar did not receive the focus change"),
    }

    let unknown = client
        .call_with(
            &lms,
            &lms_origin,
            "deleteEverything",
            vec![],
            CallOptions::default().timeout(config.call_timeout()),
        )
        .await;
    match unknown {
        Ok(value) => println!("deleteEverything -> {}", value),
        Err(e) => println!("deleteEverything failed: {}", e),
    }

    rpc.server().off();
    sidebar_server.off();
    tracing::info!("Shutting down...");

    Ok(())
}
