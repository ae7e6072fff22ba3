//! Frames onto one HTTP response body.
//!
//! The exchange task writes [`Frame`]s into a [`FrameSink`]; the response
//! body drains the other end, one newline-terminated JSON line per frame.
//! The channel is small, so a slow reader holds the exchange back instead
//! of letting frames pile up.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use salesdesk_core::frame::Frame;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Writing half of a frame stream.
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
    written: AtomicUsize,
}

/// The client stopped reading.
#[derive(Debug)]
pub struct Closed;

impl FrameSink {
    /// Queue a frame. Fails once the response body has been dropped.
    pub async fn send(&self, frame: Frame) -> Result<(), Closed> {
        self.tx.send(frame).await.map_err(|_| Closed)?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Frames written so far.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    /// Resolves when the response body has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Create a sink and the streaming response that drains it.
pub fn frame_channel(buffer: usize) -> (FrameSink, Response) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let sink = FrameSink {
        tx,
        written: AtomicUsize::new(0),
    };
    (sink, frame_response(rx))
}

/// Build the streaming response. Headers go out before the first frame.
pub fn frame_response(rx: mpsc::Receiver<Frame>) -> Response {
    let stream = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.to_line()));

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn frames_become_lines_in_order() {
        let (sink, response) = frame_channel(4);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        tokio::spawn(async move {
            sink.send(Frame::status(42)).await.unwrap();
            sink.send(Frame::delta("Hello\nworld")).await.unwrap();
            sink.send(Frame::metadata(r#"{"intent":"VIEW_ACCOUNT"}"#))
                .await
                .unwrap();
            assert_eq!(sink.written(), 3);
        });

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(Frame::from_line(lines[0]).unwrap(), Frame::status(42));
        assert_eq!(Frame::from_line(lines[1]).unwrap(), Frame::delta("Hello\nworld"));
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn dropped_body_closes_the_sink() {
        let (sink, response) = frame_channel(1);
        drop(response);
        sink.closed().await;
        assert!(sink.send(Frame::status(1)).await.is_err());
        assert_eq!(sink.written(), 0);
    }
}
