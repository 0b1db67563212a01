mod common;

use std::thread;
use std::time::{Duration, Instant};

use gpiohub::poller::wait_and_drain;
use gpiohub::{
    AcquireMode, AppError, EdgeDetect, EdgeKind, GpioBackend, LineHandle, LineRegistry,
    LineRequest, LineSettings, MockGpioBackend, PullMode,
};

use common::{CHIP, line, registry};

fn edge_input(
    registry: &std::sync::Arc<LineRegistry<MockGpioBackend>>,
    offset: u32,
    debounce_ms: u64,
) -> LineHandle<MockGpioBackend> {
    let settings = LineSettings::input(PullMode::Down)
        .with_edge_detection(EdgeDetect::Both, debounce_ms)
        .expect("edge settings");
    registry
        .acquire(&line(offset), &settings, AcquireMode::Exclusive)
        .expect("acquire")
}

#[test]
fn zero_timeout_never_blocks() {
    let (_backend, registry) = registry();
    let handle = edge_input(&registry, 5, 0);

    let start = Instant::now();
    let events = handle.wait_and_drain(Some(Duration::ZERO)).expect("poll");
    assert!(events.is_empty());
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn timeout_expires_without_events() {
    let (_backend, registry) = registry();
    let handle = edge_input(&registry, 5, 0);

    let start = Instant::now();
    let events = handle
        .wait_and_drain(Some(Duration::from_millis(100)))
        .expect("wait");
    let elapsed = start.elapsed();
    assert!(events.is_empty());
    assert!(elapsed >= Duration::from_millis(95), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "overslept: {elapsed:?}");
}

#[test]
fn injected_edge_ends_wait_early() {
    let (backend, registry) = registry();
    let handle = edge_input(&registry, 6, 0);

    let injector = {
        let backend = backend.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            backend.set_level(&line(6), true);
        })
    };

    let start = Instant::now();
    let events = handle
        .wait_and_drain(Some(Duration::from_secs(5)))
        .expect("wait");
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].edge, EdgeKind::Rising);
    assert_eq!(events[0].offset, 6);
    injector.join().expect("injector");
}

#[test]
fn unbounded_wait_returns_on_event() {
    let (backend, registry) = registry();
    let handle = edge_input(&registry, 7, 0);

    let injector = {
        let backend = backend.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            backend.set_level(&line(7), true);
        })
    };

    let events = handle.wait_and_drain(None).expect("wait");
    assert!(!events.is_empty());
    injector.join().expect("injector");
}

#[test]
fn batch_is_drained_completely() {
    let (backend, registry) = registry();
    let handle = edge_input(&registry, 8, 0);

    for level in [true, false, true, false, true] {
        backend.set_level(&line(8), level);
    }

    let events = handle.wait_and_drain(Some(Duration::ZERO)).expect("poll");
    let kinds: Vec<_> = events.iter().map(|e| e.edge).collect();
    assert_eq!(
        kinds,
        vec![
            EdgeKind::Rising,
            EdgeKind::Falling,
            EdgeKind::Rising,
            EdgeKind::Falling,
            EdgeKind::Rising
        ]
    );
    assert!(
        handle
            .wait_and_drain(Some(Duration::ZERO))
            .expect("poll")
            .is_empty()
    );
}

#[test]
fn debounce_period_suppresses_chatter() {
    let (backend, registry) = registry();
    let handle = edge_input(&registry, 9, 50);

    for level in [true, false, true, false] {
        backend.set_level(&line(9), level);
    }
    let events = handle.wait_and_drain(Some(Duration::ZERO)).expect("poll");
    assert_eq!(events.len(), 1);
}

#[test]
fn rising_only_ignores_falling_edges() {
    let (backend, registry) = registry();
    let settings = LineSettings::input(PullMode::Down)
        .with_edge_detection(EdgeDetect::Rising, 0)
        .expect("edge settings");
    let handle = registry
        .acquire(&line(10), &settings, AcquireMode::Exclusive)
        .expect("acquire");

    backend.set_level(&line(10), true);
    backend.set_level(&line(10), false);
    let events = handle.wait_and_drain(Some(Duration::ZERO)).expect("poll");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].edge, EdgeKind::Rising);
}

#[test]
fn multi_line_request_is_rejected() {
    let backend = MockGpioBackend::new().with_chip(CHIP, 8);
    let mut request = backend
        .request_lines(CHIP, &[1, 2], &LineSettings::input(PullMode::Up))
        .expect("request");

    let result = wait_and_drain(&mut request, Some(Duration::ZERO));
    assert!(matches!(result, Err(AppError::InvalidRequestShape(_))));

    request.release().expect("release");
    assert_eq!(backend.requested_count(), 0);
}
