use http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Snapshot of a proxied request, taken when the head is accepted.
/// `url` is the absolute form even though the forwarded request line is
/// rewritten to origin-form.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    /// Path of the captured body file, set iff body bytes were observed.
    pub body: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<PathBuf>,
}

/// One completed exchange as published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub request: RequestRecord,
    pub response: ResponseRecord,
}

/// Flatten a header map to last-wins string pairs for the record. Values
/// that are not valid UTF-8 are dropped rather than mangled.
pub fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.insert(name.as_str().to_string(), v.to_string());
        }
    }
    out
}

/// Process-wide publisher for completed exchanges.
///
/// A bounded broadcast channel: slow subscribers lag and drop the oldest
/// records rather than backpressuring the data path. Publishing with no
/// subscribers is a no-op.
#[derive(Clone)]
pub struct RecordSink {
    tx: broadcast::Sender<ExchangeRecord>,
}

impl RecordSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeRecord> {
        self.tx.subscribe()
    }

    pub fn publish(&self, record: ExchangeRecord) {
        let _ = self.tx.send(record);
    }
}

impl Default for RecordSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn sample_record() -> ExchangeRecord {
        ExchangeRecord {
            request: RequestRecord {
                url: "http://example.test/x?y=1".into(),
                method: "GET".into(),
                headers: HashMap::new(),
                body: None,
            },
            response: ResponseRecord {
                status_code: 200,
                headers: HashMap::new(),
                body: Some(PathBuf::from("/tmp/resp-abc")),
            },
        }
    }

    #[test]
    fn flatten_is_last_wins() {
        let mut headers = HeaderMap::new();
        headers.append("x-test", HeaderValue::from_static("first"));
        headers.append("x-test", HeaderValue::from_static("second"));
        headers.insert("host", HeaderValue::from_static("example.test"));

        let flat = flatten_headers(&headers);
        assert_eq!(flat.get("x-test").map(String::as_str), Some("second"));
        assert_eq!(flat.get("host").map(String::as_str), Some("example.test"));
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let sink = RecordSink::default();
        let mut rx = sink.subscribe();

        sink.publish(sample_record());

        let got = rx.recv().await.unwrap();
        assert_eq!(got.response.status_code, 200);
        assert_eq!(got.request.method, "GET");
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let sink = RecordSink::default();
        sink.publish(sample_record());
    }
}
