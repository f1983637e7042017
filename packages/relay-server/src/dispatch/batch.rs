//! Bounded-concurrency, order-preserving fan-out over batch records.

use std::fmt::Display;
use std::future::Future;

use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use crate::traits::{ErrorReport, ErrorReporter};

/// Marker prefix of a failed record in a batch result.
pub const ERROR_MARKER: &str = "ERROR - ";

/// Runs `f` over `items` with at most `width` in flight and returns one
/// result per item, in input order.
///
/// A failing item is reported and replaced by `"ERROR - <message>"`; its
/// siblings are unaffected.
pub async fn map_bounded<T, E, F, Fut>(
    items: Vec<T>,
    width: usize,
    scope: &str,
    reporter: &dyn ErrorReporter,
    f: F,
) -> Vec<Value>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<Value, E>>,
    E: Display,
{
    stream::iter(items)
        .map(|item| {
            let fut = f(item);
            async move {
                match fut.await {
                    Ok(value) => value,
                    Err(err) => {
                        reporter.report(ErrorReport::new(scope, &err)).await;
                        Value::String(format!("{ERROR_MARKER}{err}"))
                    }
                }
            }
        })
        .buffered(width.max(1))
        .collect()
        .await
}
