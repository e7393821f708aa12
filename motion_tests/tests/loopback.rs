use std::collections::HashMap;

use motion_client::input::InputState;
use motion_shared::{
    event::{CharacterEvent, MovementEvent},
    math::Vec3,
};
use motion_tests::{arena, LinkConfig, Loopback, LoopbackConfig};

fn walking(yaw: f32) -> InputState {
    InputState {
        forward: 1.0,
        yaw,
        ..InputState::default()
    }
}

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

#[test]
fn prediction_settles_on_authority_under_latency_and_loss() -> anyhow::Result<()> {
    init_logs();
    let mut sim = Loopback::new(LoopbackConfig::default(), arena());
    sim.connect(Vec3::new(0.0, 1.3, 0.0))?;

    for tick in 0..150 {
        sim.tick(&[walking(tick as f32)])?;
    }
    sim.run(120, &[InputState::default()])?;

    let divergence = sim.divergence(0)?;
    assert!(divergence < 1e-3, "divergence {divergence}");
    let client = sim.client(0)?;
    assert!(client.downlink().dropped() > 0, "loss was never exercised");
    assert!(client.predicted()?.position.horizontal().len() > 1.0);
    Ok(())
}

#[test]
fn predicted_states_match_authority_sequence_for_sequence() -> anyhow::Result<()> {
    let config = LoopbackConfig {
        uplink: LinkConfig::delayed(48),
        downlink: LinkConfig::delayed(48),
        ..LoopbackConfig::default()
    };
    let mut sim = Loopback::new(config, arena());
    sim.connect(Vec3::new(0.0, 1.3, 0.0))?;

    let mut predicted = HashMap::new();
    for tick in 0..90 {
        let mut input = walking(tick as f32);
        input.jump = tick == 30;
        sim.tick(&[input])?;
        let state = sim.client(0)?.predicted()?;
        predicted.insert(state.sequence_number, state.position);
    }

    let entity = sim.client(0)?.entity;
    let mut compared = 0;
    for state in sim.server.history(entity)?.iter() {
        if let Some(position) = predicted.get(&state.sequence_number) {
            assert!(
                (*position - state.position).len() < 1e-4,
                "seq {} predicted {:?} server {:?}",
                state.sequence_number,
                position,
                state.position
            );
            compared += 1;
        }
    }
    assert!(compared > 50, "only {compared} states compared");
    Ok(())
}

#[test]
fn replays_do_not_repeat_events() -> anyhow::Result<()> {
    let mut sim = Loopback::new(LoopbackConfig::default(), arena());
    sim.connect(Vec3::new(0.0, 1.3, 0.0))?;

    sim.run(20, &[InputState::default()])?;
    sim.tick(&[InputState {
        jump: true,
        ..InputState::default()
    }])?;
    sim.run(80, &[InputState::default()])?;

    let client = &mut sim.clients[0];
    let jumps = client
        .events
        .drain::<CharacterEvent>()
        .into_iter()
        .filter(|e| e.event == MovementEvent::Jump)
        .count();
    assert_eq!(jumps, 1);

    let server_jumps = sim
        .server_events
        .drain::<CharacterEvent>()
        .into_iter()
        .filter(|e| e.event == MovementEvent::Jump)
        .count();
    assert_eq!(server_jumps, 1);
    Ok(())
}

#[test]
fn remote_characters_are_rendered_behind_the_authority() -> anyhow::Result<()> {
    let mut sim = Loopback::new(LoopbackConfig::default(), arena());
    sim.connect(Vec3::new(0.0, 1.3, 0.0))?;
    sim.connect(Vec3::new(4.0, 1.3, 0.0))?;
    let other = sim.client(1)?.entity;

    sim.run(60, &[InputState::default(), walking(90.0)])?;
    let seen = sim.client(0)?.pose_of(other).ok_or_else(|| anyhow::anyhow!("never rendered"))?;
    let live = sim.server.last_state(other)?.position;
    assert!((seen - Vec3::new(4.0, 1.3, 0.0)).horizontal().len() > 0.5, "remote did not move: {seen:?}");
    assert!((live - seen).len() > 0.05, "remote is not delayed");

    sim.run(120, &[InputState::default(), InputState::default()])?;
    let seen = sim.client(0)?.pose_of(other).ok_or_else(|| anyhow::anyhow!("never rendered"))?;
    let live = sim.server.last_state(other)?.position;
    assert!((live - seen).len() < 1e-2, "seen {seen:?} live {live:?}");
    Ok(())
}

#[test]
fn teleport_reaches_the_owner() -> anyhow::Result<()> {
    let mut sim = Loopback::new(LoopbackConfig::default(), arena());
    sim.connect(Vec3::new(0.0, 1.3, 0.0))?;
    sim.run(30, &[InputState::default()])?;

    let entity = sim.client(0)?.entity;
    let target = Vec3::new(10.0, 1.3, -6.0);
    let now = sim.now;
    sim.server.teleport(entity, target, now, &mut sim.server_world)?;
    sim.run(60, &[InputState::default()])?;

    let predicted = sim.client(0)?.predicted()?.position;
    assert!((predicted.horizontal() - target.horizontal()).len() < 1e-3, "{predicted:?}");
    Ok(())
}
