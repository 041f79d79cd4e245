//! Streamed POST responses: the response opens immediately and a
//! whitespace heartbeat keeps middleboxes from timing the connection
//! out while the engine works; the decided outcome is written last as a
//! JSON trailer.

use crate::envelope::HttpOutcome;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(3000);
/// A single space: ignored by JSON parsers reading the trailer.
pub const HEARTBEAT: &str = " ";

/// Run `work` while streaming heartbeats, then write its trailer.
pub fn streamed<F>(work: F) -> Response
where
    F: Future<Output = HttpOutcome> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, Infallible>>(8);

    tokio::spawn(async move {
        let mut work = Box::pin(work);
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        // The first tick fires immediately; skip it so the first write
        // after the preamble is a real heartbeat or the trailer.
        ticker.tick().await;

        loop {
            tokio::select! {
                outcome = &mut work => {
                    let _ = tx.send(Ok(outcome.trailer())).await;
                    break;
                }
                _ = ticker.tick() => {
                    if tx.send(Ok(HEARTBEAT.to_string())).await.is_err() {
                        // Client went away; drop the work.
                        break;
                    }
                }
            }
        }
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = StatusCode::CREATED;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
