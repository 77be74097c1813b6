//! Performance benchmarks for the hot paths of the arena

use client::buffer::ClientStateBuffer;
use server::broadcast::state_packet;
use server::simulation::SimulationEngine;
use shared::{decode, encode, ChaosInjector, PlayerSnapshot, MAX_DATAGRAM_SIZE};
use std::time::{Duration, Instant};

fn crowded_engine(players: usize) -> SimulationEngine {
    let mut engine = SimulationEngine::with_seed(800.0, 600.0, 6, 1);
    for i in 0..players {
        let angle = i as f32 * 0.37;
        engine.apply_input(&format!("p{}", i), angle.cos(), angle.sin(), i % 3 == 0);
    }
    engine
}

/// Benchmarks one simulation tick with a full server
#[test]
fn benchmark_simulation_tick() {
    let mut engine = crowded_engine(32);

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        if i % 40 == 0 {
            engine.apply_input("p0", 1.0, 0.0, true);
        }
        engine.tick(0.025);
    }

    let duration = start.elapsed();
    println!(
        "Simulation tick (32 players): {} iterations in {:?} ({:.2} us/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // 10k ticks is over four minutes of play; must be far cheaper than that
    assert!(duration.as_millis() < 2_000);
    assert_eq!(engine.world().orbs.len(), 6);
}

/// Stress test with far more players than a real match
#[test]
fn stress_test_many_players() {
    let mut engine = crowded_engine(500);

    let start = Instant::now();
    for _ in 0..400 {
        engine.tick(0.025);
    }
    let duration = start.elapsed();

    println!("400 ticks with 500 players: {:?}", duration);
    assert!(duration.as_millis() < 2_000);
    assert_eq!(engine.player_count(), 500);
}

/// Benchmarks snapshot encoding for a full server
#[test]
fn benchmark_snapshot_encoding() {
    let mut engine = crowded_engine(32);
    engine.tick(0.025);

    let iterations = 10_000;
    let start = Instant::now();
    let mut bytes = 0;

    for tick in 0..iterations {
        let data = encode(&state_packet(tick, engine.world())).unwrap();
        bytes = data.len();
        let _ = decode(&data).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encode+decode: {} iterations in {:?}, {} bytes each",
        iterations, duration, bytes
    );

    assert!(bytes < MAX_DATAGRAM_SIZE);
    assert!(duration.as_millis() < 3_000);
}

/// Benchmarks interpolated queries at render rate
#[test]
fn benchmark_buffer_queries() {
    let buffer = ClientStateBuffer::with_seed(1);
    let entities = 32;

    for step in 0..10 {
        for i in 0..entities {
            buffer.ingest(
                &PlayerSnapshot {
                    id: format!("p{}", i),
                    x: step as f32 * 4.0,
                    y: i as f32,
                    angle: step as f32 * 0.5,
                    score: step,
                    boost_charges: 1,
                    boost_active: false,
                },
                step as f64 * 0.025,
            );
        }
    }

    let iterations = 5_000;
    let start = Instant::now();

    for frame in 0..iterations {
        let now = 0.225 + frame as f64 / 120.0;
        let view = buffer.query_all(now);
        assert_eq!(view.len(), entities);
    }

    let duration = start.elapsed();
    println!(
        "query_all over {} entities: {} frames in {:?}",
        entities, iterations, duration
    );
    assert!(duration.as_millis() < 3_000);
}

/// Benchmarks the chaos gate on the send path
#[test]
fn benchmark_chaos_verdicts() {
    let chaos = ChaosInjector::with_seed(5);
    chaos.trigger(Duration::from_secs(60), 120, 40, 0.3);

    let iterations = 100_000;
    let start = Instant::now();
    let mut dropped = 0;

    for _ in 0..iterations {
        if chaos.should_drop() {
            dropped += 1;
        }
        let _ = chaos.delay_ms();
    }

    let duration = start.elapsed();
    println!(
        "Chaos gate: {} iterations in {:?}, {} dropped",
        iterations, duration, dropped
    );

    assert!(duration.as_millis() < 1_000);
    assert!(dropped > 25_000 && dropped < 35_000);
}
