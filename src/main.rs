mod config;
mod csv_io;
mod db;
mod ipc;
mod logging;
mod roster;
mod session;
mod store;
mod students;

use std::io::{self, BufRead, Write};

fn write_line(stdout: &mut io::Stdout, resp: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}

fn main() {
    let cfg = config::DaemonConfig::from_env();
    logging::init(&cfg.log_filter, cfg.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "portald starting");

    let mut state = ipc::AppState::default();
    if let Some(path) = cfg.workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            tracing::error!(workspace = %path.display(), "could not open workspace: {e:?}");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                tracing::warn!("unparseable request: {e}");
                write_line(&mut stdout, &ipc::bad_json(e.to_string()));
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        write_line(&mut stdout, &resp);
    }
    tracing::info!("stdin closed, exiting");
}
