use std::time::Duration;

use log::trace;

use crate::error::AppError;
use crate::gpio::{EdgeEvent, LineRequest};

/// Waits up to `timeout` for edge events on a single-line request and drains
/// everything that is queued.
///
/// `Some(Duration::ZERO)` returns immediately, `None` blocks until at least one
/// event arrives. An expired timeout yields an empty batch.
pub fn wait_and_drain<R: LineRequest>(
    request: &mut R,
    timeout: Option<Duration>,
) -> Result<Vec<EdgeEvent>, AppError> {
    if request.num_lines() != 1 {
        return Err(AppError::InvalidRequestShape(format!(
            "expected exactly one line, request holds {}",
            request.num_lines()
        )));
    }

    if !request.wait_edge_events(timeout)? {
        return Ok(Vec::new());
    }

    let mut events = request.read_edge_events()?;
    while request.wait_edge_events(Some(Duration::ZERO))? {
        let more = request.read_edge_events()?;
        if more.is_empty() {
            break;
        }
        events.extend(more);
    }

    trace!(
        "drained {} edge events from line {}",
        events.len(),
        request.offsets()[0]
    );
    Ok(events)
}
