//! chatRelay console node.
//!
//! Host adapter for terminals: stdin lines are chat events or control
//! commands, the engine is ticked on a fixed interval from the same task, and
//! relayed lines are printed to stdout.
//!
//! Usage: `chatrelay-engine [config.yaml]` (default `chatrelay.yaml`).

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::{fmt, EnvFilter};

use chatrelay_core::error::{RelayError, Result};
use chatrelay_engine::app_state::RelayApp;
use chatrelay_engine::config::{self, RelayConfig};
use chatrelay_engine::host::console::{parse_line, ConsoleCommand, ConsoleHost};
use chatrelay_engine::host::ChatHost;
use chatrelay_engine::router;

const DEFAULT_CONFIG: &str = "chatrelay.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = load_config(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let host = Arc::new(ConsoleHost::stdout());
    let app = RelayApp::new(cfg, Arc::clone(&host) as Arc<dyn ChatHost>, tokio::runtime::Handle::current())?;
    tracing::info!(origin_id = app.engine().origin_id(), transport = app.engine().transport_kind(), "chatrelay node ready");

    if let Some(listen) = app.cfg().ops.listen_addr()? {
        let ops = router::build_router(app.clone());
        let listener = tokio::net::TcpListener::bind(listen).await?;
        tracing::info!(%listen, "ops endpoint listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, ops).await {
                tracing::error!(error = %e, "ops server stopped");
            }
        });
    }

    if app.cfg().relay.autostart {
        let mode = app.cfg().relay.mode;
        if let Err(e) = app.engine().start(mode) {
            host.notify_status(&format!("start failed: {e}"));
        }
    }

    let result = run_console(&app, &host).await;
    app.shutdown();
    result
}

fn load_config(path: &str) -> Result<RelayConfig> {
    if Path::new(path).exists() {
        config::load_from_file(path)
    } else {
        // No file: all defaults.
        config::load_from_str("version: 1\n")
    }
}

async fn run_console(app: &RelayApp, host: &ConsoleHost) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = interval(Duration::from_millis(app.cfg().host.tick_ms));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.map_err(RelayError::from)? else { break; };
                match parse_line(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(cmd) => handle(app, host, cmd),
                    Err(e) => host.notify_status(&e.to_string()),
                }
            }

            _ = tick.tick() => {
                app.engine().tick();
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn handle(app: &RelayApp, host: &ConsoleHost, cmd: ConsoleCommand) {
    let engine = app.engine();
    match cmd {
        ConsoleCommand::Start(mode) => {
            if let Err(e) = engine.start(mode) {
                host.notify_status(&format!("start failed: {e}"));
            }
        }
        ConsoleCommand::Stop => engine.stop(),
        ConsoleCommand::Status => {
            let state = engine.state();
            let mode = state.mode.map(|m| m.as_str()).unwrap_or("-");
            host.notify_status(&format!(
                "status={:?} mode={mode} transport={} origin={} queued={}",
                state.status,
                engine.transport_kind(),
                engine.origin_id(),
                engine.queued()
            ));
        }
        ConsoleCommand::Chat(event) => host.inject(&event),
        ConsoleCommand::Quit | ConsoleCommand::Empty => {}
    }
}
