use std::sync::mpsc::channel;

use lockstep::log::{Logger, Record};
use lockstep::vm::Expr;
use lockstep::{
    bpm_to_micros, AudioDriver, EngineConfig, EngineContext, EventKind, Stmt, TempoEvent,
    TempoMap, TickClock, TickSource, TimingMode,
};

/// Deterministic buffer sizes between 1 and 2048 samples
fn buffer_sizes(count: usize) -> Vec<u32> {
    let mut state: u32 = 0x2545_f491;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state % 2048 + 1
        })
        .collect()
}

#[test]
fn test_one_second_at_120() {
    let context = EngineContext::new(EngineConfig::default()).unwrap();
    let mut audio = AudioDriver::new(context.clone(), TempoMap::default()).unwrap();
    assert_eq!(audio.process_samples(44_100).unwrap(), 961);
    assert_eq!(audio.clock().current_tempo_bpm(), 120.0);
    assert_eq!(context.lock().unwrap().last_delivered(TickSource::Audio), 960);
}

#[test]
fn test_tick_at_time_after_tempo_change() {
    let map = TempoMap::new(&[
        TempoEvent::new(0, 500_000),
        TempoEvent::new(480, bpm_to_micros(140.0)),
    ])
    .unwrap();
    let clock = TickClock::new(44_100, 480, map).unwrap();
    let boundary = clock.seconds_at_tick(480);
    assert!((boundary - 0.5).abs() < 1e-9);
    let tick = clock.tick_at_time(boundary + 1.0);
    assert!((tick - 1600).abs() <= 1, "got {}", tick);
}

#[test]
fn test_buffer_size_independence() {
    let map = TempoMap::new(&[
        TempoEvent::new(0, 500_000),
        TempoEvent::new(300, 250_000),
        TempoEvent::new(2000, 750_000),
    ])
    .unwrap();
    let sizes = buffer_sizes(200);
    let total: u32 = sizes.iter().sum();

    let mut whole = TickClock::new(48_000, 96, map.clone()).unwrap();
    whole.process_samples(total);

    let mut split = TickClock::new(48_000, 96, map).unwrap();
    for &size in &sizes {
        split.process_samples(size);
    }
    assert!((whole.fractional_tick() - split.fractional_tick()).abs() < 0.01);
    assert_eq!(whole.segment_index(), split.segment_index());
}

#[test]
fn test_tempo_boundary_continuity() {
    let map = TempoMap::new(&[TempoEvent::new(0, 500_000), TempoEvent::new(100, 200_000)]).unwrap();
    let mut clock = TickClock::new(44_100, 480, map).unwrap();
    // Worst case ticks in one 512 sample buffer at the faster tempo
    let limit = 512.0 / 44_100.0 * (300.0 / 60.0 * 480.0) + 1.0;
    let mut last = -1;
    for _ in 0..100 {
        if let Some(tick) = clock.process_samples(512) {
            assert!(tick > last);
            assert!(((tick - last) as f64) <= limit);
            last = tick;
        }
    }
    assert!(last > 100);
}

#[test]
fn test_every_audio_tick_delivered_once() {
    let context = EngineContext::new(EngineConfig::default()).unwrap();
    let (sender, receiver) = channel();
    {
        let mut scheduler = context.lock().unwrap();
        scheduler.set_logger(Logger::new(sender));
        scheduler
            .register_handler(
                EventKind::AudioTick,
                None,
                &[Stmt::call("print", vec![Expr::var("tick")])],
                TimingMode::AudioTime,
                None,
            )
            .unwrap();
    }

    let map = TempoMap::new(&[TempoEvent::new(0, 500_000), TempoEvent::new(700, 300_000)]).unwrap();
    let mut audio = AudioDriver::new(context.clone(), map).unwrap();
    for size in buffer_sizes(150) {
        audio.process_samples(size).unwrap();
    }
    let last = context.lock().unwrap().last_delivered(TickSource::Audio);
    drop(context);
    drop(audio);

    let ticks: Vec<i64> = receiver
        .try_iter()
        .filter_map(|msg| match msg.data {
            Record::Printed { text, .. } => text.parse().ok(),
            _ => None,
        })
        .collect();
    let expected: Vec<i64> = (0..=last).collect();
    assert!(last > 700);
    assert_eq!(ticks, expected);
}

#[test]
fn test_tick_at_time_is_pure() {
    let map = TempoMap::new(&[TempoEvent::new(0, 600_000), TempoEvent::new(960, 400_000)]).unwrap();
    let clock = TickClock::new(44_100, 480, map).unwrap();
    let first = clock.tick_at_time(3.25);
    for step in 0..100 {
        clock.tick_at_time(f64::from(step) * 0.05);
    }
    assert_eq!(clock.tick_at_time(3.25), first);
    assert_eq!(clock.last_delivered_tick(), -1);
}
