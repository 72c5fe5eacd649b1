//! Server-sent-event framing for relaying a run to a client.
//!
//! The engine ships no HTTP server. These helpers turn an [`EventStream`] into
//! the text frames an SSE endpoint writes: a connection preamble, then one
//! `data:` frame per event carrying the payload as JSON, ending after the
//! terminal kind.

use futures::stream::{self, BoxStream, StreamExt};

use crate::{Event, EventKind, EventStream, Result};

/// The first frame sent to every client.
pub const CONNECTED: &str = "Connected to workflow";

/// Frame `data` as one SSE message. Multi-line data gets one `data:` line each.
///
/// ```rust
/// use llm_flow::sse;
///
/// assert_eq!(sse::frame("hi"), "data: hi\n\n");
/// assert_eq!(sse::frame("a\nb"), "data: a\ndata: b\n\n");
/// ```
pub fn frame(data: &str) -> String {
    let mut framed = String::with_capacity(data.len() + 8);
    for line in data.split('\n') {
        framed.push_str("data: ");
        framed.push_str(line);
        framed.push('\n');
    }
    framed.push('\n');
    framed
}

/// The connection preamble frame.
pub fn connected_frame() -> String {
    frame(CONNECTED)
}

/// Frame an event's JSON payload.
pub fn encode_event(event: &Event) -> Result<String> {
    let json = serde_json::to_string(&event.to_json()?)?;
    Ok(frame(&json))
}

/// Frames for every event of `events` up to and including the first `terminal`.
///
/// An event whose payload cannot be encoded, or a run failure, is yielded
/// as `Err` and ends the relay.
pub fn relay<T: Send + Sync + 'static>(
    events: EventStream,
    terminal: &EventKind<T>,
) -> BoxStream<'static, Result<String>> {
    let frames = events.until_kind(terminal);
    stream::unfold(Some(frames), |frames| async move {
        let mut frames = frames?;
        let framed = match frames.next().await? {
            Ok(event) => encode_event(&event),
            Err(err) => Err(err),
        };
        let rest = if framed.is_ok() { Some(frames) } else { None };
        Some((framed, rest))
    })
    .boxed()
}

/// [`connected_frame`] followed by [`relay`].
///
/// ```rust
/// use futures::StreamExt;
/// use llm_flow::{sse, EventKind, Workflow};
///
/// # tokio_test::block_on(async {
/// let start = EventKind::<String>::serializable("start");
/// let stop = EventKind::<String>::serializable("stop");
///
/// let mut workflow = Workflow::new();
/// let done = stop.clone();
/// workflow.on(&start, move |_ctx, text| {
///     let done = done.clone();
///     async move { Ok(Some(done.with(format!("{text}!")))) }
/// });
///
/// let ctx = workflow.create_context();
/// ctx.send_event(start.with("hi".to_string())).unwrap();
///
/// let frames: Vec<String> = sse::connect(ctx.stream(), &stop)
///     .map(|frame| frame.unwrap())
///     .collect()
///     .await;
/// assert_eq!(
///     frames,
///     vec![
///         "data: Connected to workflow\n\n".to_string(),
///         "data: \"hi\"\n\n".to_string(),
///         "data: \"hi!\"\n\n".to_string(),
///     ]
/// );
/// # });
/// ```
pub fn connect<T: Send + Sync + 'static>(
    events: EventStream,
    terminal: &EventKind<T>,
) -> BoxStream<'static, Result<String>> {
    stream::once(async { Ok(connected_frame()) })
        .chain(relay(events, terminal))
        .boxed()
}
