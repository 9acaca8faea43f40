mod config;
mod db;
mod ipc;
mod sheet;
mod store;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use tracing::{error, info};

fn main() -> ExitCode {
    // stdout carries protocol lines, so all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    // Missing connection configuration is the one fatal startup condition.
    let cfg = match config::StoreConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let connector = match config::Connector::new(&cfg) {
        Ok(c) => c,
        Err(e) => {
            error!("cannot prepare storage: {e}");
            return ExitCode::FAILURE;
        }
    };

    // One-time schema setup. A failure here is logged and left to surface
    // again per operation; the loop still starts.
    match connector.acquire().and_then(|conn| db::ensure_schema(&conn)) {
        Ok(()) => info!("schema ready at {}", connector.db_path().display()),
        Err(e) => error!("schema setup failed: {e}"),
    }

    let mut state = ipc::AppState { connector };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; best-effort error line.
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    ExitCode::SUCCESS
}
