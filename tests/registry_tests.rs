mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gpiohub::{
    AcquireMode, AppError, Bias, Direction, EdgeDetect, LineHandle, LineId, LineRegistry,
    LineSettings, MockGpioBackend, PullMode,
};

use common::{CHIP, line, registry};

#[test]
fn acquire_then_release_leaves_nothing_open() {
    let (backend, registry) = registry();
    let cases = [
        LineSettings::output(),
        LineSettings::input(PullMode::Up),
        LineSettings::input(PullMode::Down),
    ];

    for (offset, settings) in cases.iter().enumerate() {
        let id = line(offset as u32);
        let handle = registry
            .acquire(&id, settings, AcquireMode::Exclusive)
            .expect("acquire");
        assert!(registry.is_requested(&id));
        assert!(backend.is_requested(&id));

        registry.release(&id);
        assert!(!registry.is_requested(&id));
        assert!(!backend.is_requested(&id));
        drop(handle);
    }
    assert_eq!(registry.open_requests(), 0);
    assert_eq!(backend.requested_count(), 0);
}

#[test]
fn dropping_handle_releases_line() {
    let (backend, registry) = registry();
    let id = line(4);
    {
        let _handle = registry
            .acquire(&id, &LineSettings::output(), AcquireMode::Exclusive)
            .expect("acquire");
        assert_eq!(backend.requested_count(), 1);
    }
    assert_eq!(registry.open_requests(), 0);
    assert!(!backend.is_requested(&id));
}

#[test]
fn release_is_idempotent() {
    let (_backend, registry) = registry();
    let id = line(3);
    let handle = registry
        .acquire(&id, &LineSettings::output(), AcquireMode::Exclusive)
        .expect("acquire");

    registry.release(&id);
    registry.release(&id);
    registry.release(&line(30));
    drop(handle);
    assert_eq!(registry.open_requests(), 0);
}

#[test]
fn released_handle_reports_io_errors() {
    let (_backend, registry) = registry();
    let id = line(3);
    let handle = registry
        .acquire(&id, &LineSettings::output(), AcquireMode::Exclusive)
        .expect("acquire");
    registry.release(&id);

    assert!(matches!(handle.write(true), Err(AppError::LineWrite(_))));
    assert!(matches!(handle.read(), Err(AppError::LineRead(_))));
}

#[test]
fn unknown_chip_and_offset_are_unavailable() {
    let (_backend, registry) = registry();

    let missing_chip = registry.acquire(
        &LineId::new("/dev/gpiochip9", 1),
        &LineSettings::output(),
        AcquireMode::Exclusive,
    );
    assert!(matches!(missing_chip, Err(AppError::DeviceUnavailable(_))));

    let out_of_range = registry.acquire(&line(32), &LineSettings::output(), AcquireMode::Exclusive);
    assert!(matches!(out_of_range, Err(AppError::DeviceUnavailable(_))));
    assert_eq!(registry.open_requests(), 0);
}

#[test]
fn exclusive_lines_cannot_be_acquired_twice() {
    let (_backend, registry) = registry();
    let id = line(7);
    let _first = registry
        .acquire(&id, &LineSettings::input(PullMode::Up), AcquireMode::Exclusive)
        .expect("acquire");

    let second = registry.acquire(&id, &LineSettings::input(PullMode::Down), AcquireMode::Shared);
    assert!(matches!(second, Err(AppError::LineBusy(_))));
    assert_eq!(
        registry.settings(&id).map(|s| s.bias),
        Some(Bias::PullUp)
    );
}

#[test]
fn shared_acquire_reconfigures_in_place() {
    let (backend, registry) = registry();
    let id = line(8);
    let first = registry
        .acquire(&id, &LineSettings::input(PullMode::Up), AcquireMode::Shared)
        .expect("acquire");
    let second = registry
        .acquire(&id, &LineSettings::input(PullMode::Down), AcquireMode::Shared)
        .expect("shared acquire");

    assert_eq!(registry.open_requests(), 1);
    assert_eq!(backend.settings(&id).map(|s| s.bias), Some(Bias::PullDown));
    assert_eq!(first.settings(), second.settings());

    drop(first);
    assert!(backend.is_requested(&id), "still held by the second holder");
    drop(second);
    assert!(!backend.is_requested(&id));
}

#[test]
fn reconfigure_replaces_settings_wholesale() {
    let (backend, registry) = registry();
    let id = line(9);
    let handle = registry
        .acquire(&id, &LineSettings::input(PullMode::Down), AcquireMode::Exclusive)
        .expect("acquire");

    let with_edges = LineSettings::input(PullMode::Down)
        .with_edge_detection(EdgeDetect::Both, 50)
        .expect("overlay");
    handle.reconfigure(&with_edges).expect("reconfigure");
    assert_eq!(backend.settings(&id), Some(with_edges.clone()));
    assert_eq!(handle.settings(), Some(with_edges));

    handle
        .reconfigure(&LineSettings::input(PullMode::Up))
        .expect("reconfigure");
    let settings = backend.settings(&id).expect("requested");
    assert_eq!(settings.edge, EdgeDetect::None);
    assert_eq!(settings.bias, Bias::PullUp);
    assert_eq!(settings.direction, Direction::Input);
}

#[test]
fn reconfigure_unknown_line_fails() {
    let (_backend, registry) = registry();
    let result = registry.reconfigure(&line(1), &LineSettings::output());
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[test]
fn invalid_settings_are_rejected_before_request() {
    let (backend, registry) = registry();
    let mut settings = LineSettings::output();
    settings.edge = EdgeDetect::Rising;

    let result = registry.acquire(&line(2), &settings, AcquireMode::Exclusive);
    assert!(matches!(result, Err(AppError::InvalidState(_))));
    assert_eq!(backend.requested_count(), 0);
}

#[test]
fn edge_overlay_rejects_none() {
    let result = LineSettings::input(PullMode::Up).with_edge_detection(EdgeDetect::None, 10);
    assert!(matches!(result, Err(AppError::InvalidEdgeMode(_))));

    let result = LineSettings::output().with_edge_detection(EdgeDetect::Both, 10);
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[test]
fn shutdown_drains_every_request() {
    let backend = MockGpioBackend::new()
        .with_chip(CHIP, 8)
        .with_chip("/dev/gpiochip1", 8);
    let registry = Arc::new(LineRegistry::new(Arc::new(backend.clone())));

    let handles: Vec<_> = [line(0), line(1), LineId::new("/dev/gpiochip1", 0)]
        .iter()
        .map(|id| {
            registry
                .acquire(id, &LineSettings::output(), AcquireMode::Exclusive)
                .expect("acquire")
        })
        .collect();
    assert_eq!(backend.requested_count(), 3);

    registry.shutdown();
    assert_eq!(registry.open_requests(), 0);
    assert_eq!(backend.requested_count(), 0);

    // handles outliving the registry drain must not panic on drop
    drop(handles);

    let again = registry.acquire(&line(0), &LineSettings::output(), AcquireMode::Exclusive);
    assert!(again.is_ok());
}

#[test]
fn loopback_reads_back_written_level() {
    let (backend, registry) = registry();
    let out_id = line(20);
    let in_id = line(21);
    backend.wire(&out_id, &in_id);

    let output = registry
        .acquire(&out_id, &LineSettings::output(), AcquireMode::Exclusive)
        .expect("output");
    let input = registry
        .acquire(&in_id, &LineSettings::input(PullMode::Down), AcquireMode::Exclusive)
        .expect("input");

    for value in [true, false, true] {
        for invert in [false, true] {
            output.write(gpiohub::debounce::raw_level(value, invert)).expect("write");
            let logical = gpiohub::debounce::logical_level(input.read().expect("read"), invert);
            assert_eq!(logical, value);
        }
    }
}

fn waiting_input(
    registry: &Arc<LineRegistry<MockGpioBackend>>,
    offset: u32,
) -> LineHandle<MockGpioBackend> {
    let settings = LineSettings::input(PullMode::Down)
        .with_edge_detection(EdgeDetect::Both, 0)
        .expect("edge settings");
    registry
        .acquire(&line(offset), &settings, AcquireMode::Exclusive)
        .expect("acquire")
}

#[test]
fn edge_wait_does_not_stall_other_lines() {
    let (_backend, registry) = registry();
    let handle = waiting_input(&registry, 3);

    let waiter = thread::spawn(move || {
        let events = handle
            .wait_and_drain(Some(Duration::from_secs(2)))
            .expect("wait");
        (handle, events)
    });
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    registry
        .reconfigure(
            &line(3),
            &LineSettings::input(PullMode::Up)
                .with_edge_detection(EdgeDetect::Rising, 0)
                .expect("edge settings"),
        )
        .expect("reconfigure");
    let elapsed = start.elapsed();
    assert!(elapsed < Duration::from_millis(500), "reconfigure took {elapsed:?}");

    let start = Instant::now();
    let other = registry.acquire(&line(9), &LineSettings::output(), AcquireMode::Exclusive);
    assert!(other.is_ok());
    let elapsed = start.elapsed();
    assert!(elapsed < Duration::from_millis(500), "acquire took {elapsed:?}");
    drop(other);

    let (handle, events) = waiter.join().expect("waiter");
    assert!(events.is_empty());
    assert_eq!(handle.settings().map(|s| s.edge), Some(EdgeDetect::Rising));
}

#[test]
fn release_interrupts_unbounded_wait() {
    let (backend, registry) = registry();
    let handle = waiting_input(&registry, 4);

    let waiter = thread::spawn(move || handle.wait_and_drain(None));
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    registry.release(&line(4));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(!backend.is_requested(&line(4)));

    let result = waiter.join().expect("waiter");
    assert!(matches!(result, Err(AppError::LineRead(_))));
}
