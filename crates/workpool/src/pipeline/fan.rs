//! Fan-out and fan-in
//!
//! ```text
//!                    ┌─► [consumer 0] ─┐
//!   input ─ fan_out ─┼─► [consumer 1] ─┼─ fan_in ─► output
//!                    └─► [consumer 2] ─┘
//! ```
//!
//! Fan-out shares one buffer between K consumers, so each item reaches exactly
//! one of them. Fan-in forwards every input into one output; each forwarder
//! holds a sink clone, and the output closes when the last forwarder ends.

use tokio_util::task::TaskTracker;

use super::channel::{channel, Sink, Stream};

/// Split `input` across `k` consumers
///
/// Load distributes naturally: whichever consumer is ready takes the next
/// item. No ordering holds across consumers. `k == 0` drops the input.
pub fn fan_out<T>(input: Stream<T>, k: usize) -> Vec<Stream<T>> {
    match k {
        0 => Vec::new(),
        _ => {
            let mut outputs = Vec::with_capacity(k);
            outputs.extend(std::iter::repeat_with(|| input.clone()).take(k - 1));
            outputs.push(input);
            outputs
        }
    }
}

/// Merge `inputs` into one stream, forwarding on tasks spawned on `tracker`
///
/// Emits every item from every input exactly once and closes only after all
/// inputs have closed. Must be called from within a Tokio runtime.
pub fn fan_in<T>(inputs: Vec<Stream<T>>, capacity: usize, tracker: &TaskTracker) -> Stream<T>
where
    T: Send + 'static,
{
    let (sink, output) = channel(capacity);
    for input in inputs {
        tracker.spawn(forward(input, sink.clone()));
    }
    output
}

async fn forward<T>(input: Stream<T>, output: Sink<T>) {
    while let Some(item) = input.recv().await {
        if output.send(item).await.is_err() {
            break;
        }
    }
}
