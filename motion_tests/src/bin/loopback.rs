//! Loopback demo.
//!
//! Usage:
//!   cargo run -p motion_tests --bin loopback -- [--clients 2] [--ticks 600]
//!       [--latency 60] [--jitter 10] [--loss 0.1] [--seed 7] [--config motion.json]
//!
//! Runs one authority and a few predicting clients over simulated links,
//! paced in real time, and logs how far each prediction drifts from the
//! authority.

use std::env;

use anyhow::Context;
use motion_client::input::InputState;
use motion_shared::{config::MotionConfig, math::Vec3};
use motion_tests::{arena, LinkConfig, Loopback, LoopbackConfig};
use tracing::info;

struct Args {
    clients: usize,
    ticks: usize,
    latency_ms: i64,
    jitter_ms: i64,
    loss: f64,
    seed: u64,
    config: Option<String>,
}

fn parse_args() -> Args {
    let mut out = Args {
        clients: 2,
        ticks: 600,
        latency_ms: 60,
        jitter_ms: 10,
        loss: 0.1,
        seed: 7,
        config: None,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--clients", Some(v)) => out.clients = v.parse().unwrap_or(out.clients),
            ("--ticks", Some(v)) => out.ticks = v.parse().unwrap_or(out.ticks),
            ("--latency", Some(v)) => out.latency_ms = v.parse().unwrap_or(out.latency_ms),
            ("--jitter", Some(v)) => out.jitter_ms = v.parse().unwrap_or(out.jitter_ms),
            ("--loss", Some(v)) => out.loss = v.parse().unwrap_or(out.loss),
            ("--seed", Some(v)) => out.seed = v.parse().unwrap_or(out.seed),
            ("--config", Some(v)) => out.config = Some(v.clone()),
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    out
}

fn load_motion_config(path: Option<&str>) -> anyhow::Result<MotionConfig> {
    let Some(path) = path else {
        return Ok(MotionConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
    MotionConfig::from_json_str(&text).with_context(|| format!("parse {path}"))
}

/// Client `i` walks a circle, each at its own turn rate. The last quarter of
/// the run is idle so predictions can settle.
fn script(clients: usize, tick: usize, ticks: usize) -> Vec<InputState> {
    let idle = tick >= ticks - ticks / 4;
    (0..clients)
        .map(|i| {
            if idle {
                return InputState::default();
            }
            InputState {
                forward: 1.0,
                yaw: (tick as f32) * (1.0 + i as f32),
                running: i % 2 == 1,
                jump: tick % 120 == 60,
                ..InputState::default()
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let motion = load_motion_config(args.config.as_deref())?;
    let link = LinkConfig {
        latency_ms: args.latency_ms,
        jitter_ms: args.jitter_ms,
        loss: args.loss,
    };
    let config = LoopbackConfig {
        motion,
        uplink: LinkConfig::delayed(args.latency_ms),
        downlink: link,
        seed: args.seed,
        ..LoopbackConfig::default()
    };
    info!(clients = args.clients, ticks = args.ticks, ?link, "starting loopback");

    let tick_interval = std::time::Duration::from_millis(u64::from(config.tick_ms));
    let mut sim = Loopback::new(config, arena());
    for i in 0..args.clients {
        sim.connect(Vec3::new(i as f32 * 3.0, 1.3, 0.0))?;
    }

    let mut interval = tokio::time::interval(tick_interval);
    for tick in 0..args.ticks {
        interval.tick().await;
        sim.tick(&script(args.clients, tick, args.ticks))?;
        if tick % 60 == 0 {
            for i in 0..sim.clients.len() {
                info!(tick, client = i, divergence = sim.divergence(i)?, "drift");
            }
        }
    }

    for (i, client) in sim.clients.iter().enumerate() {
        info!(
            client = i,
            divergence = sim.divergence(i)?,
            sent = client.downlink().sent(),
            dropped = client.downlink().dropped(),
            "finished"
        );
    }
    Ok(())
}
