//! SSE splitter — a byte-level pass-through transform over an upstream
//! Server-Sent-Events body. Forwards every chunk to the client unmodified
//! while incrementally scanning `data: {...}` lines to latch the
//! first-seen `{model, usage}` pair, then fires a metering callback
//! exactly once when the stream ends.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::oneshot;

use crate::pricing::Usage;
use crate::provider::ProviderAdapter;

/// Incremental parser state: a partial-line buffer plus the two latched
/// optional fields. Lives only for the duration of one response stream.
#[derive(Default)]
struct SplitterState {
    buffer: String,
    model: Option<String>,
    usage: Option<Usage>,
}

impl SplitterState {
    fn feed(&mut self, chunk: &[u8], adapter: &dyn ProviderAdapter) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        // Split on '\n', keeping the final (possibly incomplete) element
        // as the new buffer.
        let mut lines: Vec<String> = self.buffer.split('\n').map(str::to_string).collect();
        self.buffer = lines.pop().unwrap_or_default();

        for line in lines {
            let line = line.trim_end_matches('\r');
            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            let Ok(event) = serde_json::from_str::<serde_json::Value>(payload) else {
                continue;
            };

            let parsed = adapter.parse(&event);
            if self.model.is_none() {
                self.model = parsed.model;
            }
            if self.usage.is_none() {
                self.usage = parsed.usage;
            }
        }
    }
}

pin_project! {
    /// Wraps an upstream byte stream, forwarding every item downstream
    /// unchanged while independently latching `{model, usage}` for
    /// metering. Sends the latched pair through `report` exactly once,
    /// when the inner stream ends.
    pub struct SseSplitter<S> {
        #[pin]
        inner: S,
        state: SplitterState,
        adapter: std::sync::Arc<dyn ProviderAdapter>,
        report: Option<oneshot::Sender<(Option<String>, Option<Usage>)>>,
    }
}

impl<S> SseSplitter<S> {
    /// Wrap `inner`, scanning with `adapter` and reporting the latched
    /// `{model, usage}` on `report` once the stream completes.
    pub fn new(
        inner: S,
        adapter: std::sync::Arc<dyn ProviderAdapter>,
        report: oneshot::Sender<(Option<String>, Option<Usage>)>,
    ) -> Self {
        Self {
            inner,
            state: SplitterState::default(),
            adapter,
            report: Some(report),
        }
    }
}

impl<S, E> Stream for SseSplitter<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.state.feed(&chunk, this.adapter.as_ref());
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                if let Some(tx) = this.report.take() {
                    let _ = tx.send((this.state.model.clone(), this.state.usage));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::openai::OpenAiAdapter;
    use futures::stream;

    fn adapter() -> std::sync::Arc<dyn ProviderAdapter> {
        std::sync::Arc::new(OpenAiAdapter)
    }

    #[tokio::test]
    async fn forwards_chunks_unmodified_and_latches_first_usage() {
        let chunks = vec![
            Bytes::from_static(b"data: {\"model\":\"m1\"}\n\n"),
            Bytes::from_static(
                b"data: {\"model\":\"m1\",\"usage\":{\"prompt_tokens\":500,\"completion_tokens\":200}}\n\n",
            ),
        ];
        let source = stream::iter(chunks.clone().into_iter().map(Ok::<_, std::io::Error>));
        let (tx, rx) = oneshot::channel();
        let splitter = SseSplitter::new(source, adapter(), tx);

        let forwarded: Vec<Bytes> = futures::StreamExt::collect::<Vec<_>>(splitter)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(forwarded, chunks);

        let (model, usage) = rx.await.unwrap();
        assert_eq!(model.as_deref(), Some("m1"));
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_tokens, 500);
        assert_eq!(usage.completion_tokens, 200);
    }

    #[tokio::test]
    async fn latches_the_first_frame_not_a_later_correction() {
        let chunks = vec![
            Bytes::from_static(
                b"data: {\"model\":\"m1\",\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1}}\n\n",
            ),
            Bytes::from_static(
                b"data: {\"model\":\"m1\",\"usage\":{\"prompt_tokens\":999,\"completion_tokens\":999}}\n\n",
            ),
        ];
        let source = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        let (tx, rx) = oneshot::channel();
        let splitter = SseSplitter::new(source, adapter(), tx);

        let _: Vec<_> = futures::StreamExt::collect::<Vec<_>>(splitter).await;

        let (_, usage) = rx.await.unwrap();
        assert_eq!(usage.unwrap().prompt_tokens, 1);
    }

    #[tokio::test]
    async fn malformed_json_frame_is_silently_skipped() {
        let chunks = vec![
            Bytes::from_static(b"data: not json at all\n\n"),
            Bytes::from_static(
                b"data: {\"model\":\"m1\",\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":2}}\n\n",
            ),
        ];
        let source = stream::iter(chunks.clone().into_iter().map(Ok::<_, std::io::Error>));
        let (tx, rx) = oneshot::channel();
        let splitter = SseSplitter::new(source, adapter(), tx);

        let forwarded: Vec<Bytes> = futures::StreamExt::collect::<Vec<_>>(splitter)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(forwarded, chunks);

        let (model, usage) = rx.await.unwrap();
        assert_eq!(model.as_deref(), Some("m1"));
        assert_eq!(usage.unwrap().prompt_tokens, 2);
    }

    #[tokio::test]
    async fn chunk_split_mid_line_is_reassembled_before_parsing() {
        let chunks = vec![
            Bytes::from_static(b"data: {\"model\":\"m1\",\"usage\":{\"prompt"),
            Bytes::from_static(b"_tokens\":7,\"completion_tokens\":3}}\n\n"),
        ];
        let source = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        let (tx, rx) = oneshot::channel();
        let splitter = SseSplitter::new(source, adapter(), tx);

        let _: Vec<_> = futures::StreamExt::collect::<Vec<_>>(splitter).await;

        let (_, usage) = rx.await.unwrap();
        assert_eq!(usage.unwrap().prompt_tokens, 7);
    }

    #[tokio::test]
    async fn missing_model_and_usage_reports_none_for_both() {
        let chunks = vec![Bytes::from_static(b"data: {}\n\n")];
        let source = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        let (tx, rx) = oneshot::channel();
        let splitter = SseSplitter::new(source, adapter(), tx);

        let _: Vec<_> = futures::StreamExt::collect::<Vec<_>>(splitter).await;

        let (model, usage) = rx.await.unwrap();
        assert!(model.is_none());
        assert!(usage.is_none());
    }
}
