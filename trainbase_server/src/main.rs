//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p trainbase_server -- [--tick-hz 64] [--data-dir data] [--config config/TrainBase.json] [--save-interval 19200]
//!
//! Runs the in-memory world at a fixed timestep with the anchor service attached.
//!
//! Console commands:
//!   spawn <prefab> [x y z]       - Spawn a prefab
//!   kill <key>                   - Destroy an entity (and its children)
//!   move <key> <x> <y> <z>       - Teleport a root entity
//!   drive <key> <vx> <vy> <vz>   - Move a train at constant velocity
//!   pos / look <x> <y> <z>       - Place the console player's eyes / view direction
//!   grant / revoke               - Toggle the console player's permission
//!   trainbase [...]              - The player command
//!   save                         - Save now
//!   status                       - Show server status
//!   quit                         - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use tokio::sync::mpsc;
use trainbase_server::server::{GameServer, ServerState};
use trainbase_shared::config::ServerConfig;
use tracing::info;

fn parse_args() -> ServerConfig {
    let mut cfg = ServerConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(64);
                i += 2;
            }
            "--data-dir" if i + 1 < args.len() => {
                cfg.data_dir = args[i + 1].clone();
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                cfg.config_path = args[i + 1].clone();
                i += 2;
            }
            "--save-interval" if i + 1 < args.len() => {
                cfg.save_interval_ticks = args[i + 1].parse().unwrap_or(cfg.save_interval_ticks);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(
        tick_hz = cfg.tick_hz,
        data_dir = %cfg.data_dir,
        config = %cfg.config_path,
        "Starting server"
    );

    let mut server = GameServer::new(cfg.clone()).context("create server")?;

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!(
        "Server ready. Type 'spawn <prefab> 5 1.6 0' then 'trainbase', 'status' for info, 'quit' to exit."
    );
    println!();

    let tick_interval = std::time::Duration::from_secs_f32(1.0 / cfg.tick_hz.max(1) as f32);
    let mut next_tick = tokio::time::Instant::now();

    while *server.state() == ServerState::Running {
        server.step(tick_interval.as_secs_f32())?;

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    server.shutdown();
    Ok(())
}
