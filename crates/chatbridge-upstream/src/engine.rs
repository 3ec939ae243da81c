//! Streaming reconciliation: upstream lines in, [`ChatEvent`]s out.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chatbridge_auth::SessionCredential;
use futures::{Stream, StreamExt};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace, warn};

use crate::frame::{lines, parse_line, UpstreamFrame};
use crate::image::{
    completion_message, preamble_message, ImageJob, ImageJobPoller, ImageRef, IMAGE_MARKER,
};
use crate::reconcile::Reconciler;
use crate::types::{ChatEvent, ChatSession, FinishReason};

/// Everything one relayed stream needs besides its body.
#[derive(Clone)]
pub struct StreamContext {
    pub session: ChatSession,
    pub credential: Arc<SessionCredential>,
    pub poller: Option<Arc<dyn ImageJobPoller>>,
    pub min_suffix_match: usize,
}

/// Aborts the task when dropped, so an abandoned stream does not leave an
/// image poll running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Turn an upstream body into client events.
///
/// The stream always opens with [`ChatEvent::Role`] and always closes with
/// one [`ChatEvent::Finish`] followed by [`ChatEvent::Done`], even when the
/// body ends early or fails.
pub fn chat_events<S, E>(body: S, ctx: StreamContext) -> impl Stream<Item = ChatEvent> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let chat_id = ctx.session.id.clone();
        let mut lines = Box::pin(lines(body));
        let mut reconciler = Reconciler::new(ctx.min_suffix_match);
        let mut image_started = false;
        let mut finish = FinishReason::Stop;

        yield ChatEvent::Role;

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(%chat_id, error = %e, "upstream body failed");
                    break;
                }
            };

            let frame = match parse_line(&line) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    debug!(%chat_id, error = %e, line = %line, "skipping upstream line");
                    continue;
                }
            };

            match frame {
                UpstreamFrame::Text(text) if text.contains(IMAGE_MARKER) => {
                    if image_started {
                        debug!(%chat_id, "ignoring repeated image marker");
                        continue;
                    }
                    let Some(job) = ImageJob::from_marker(&text) else {
                        warn!(%chat_id, "image marker without job attributes");
                        continue;
                    };
                    image_started = true;

                    yield ChatEvent::Content(preamble_message(&job));
                    let started = Instant::now();
                    let image = run_poll(&ctx, job).await;
                    let elapsed = started.elapsed();
                    yield ChatEvent::Content(completion_message(elapsed, image.as_ref()));
                }
                UpstreamFrame::Text(text) => {
                    let delta = reconciler.push_frame(&text);
                    if !delta.is_empty() {
                        yield ChatEvent::Content(delta);
                    }
                }
                UpstreamFrame::Finish(reason) => {
                    finish = reason;
                    break;
                }
                UpstreamFrame::Error(payload) => {
                    warn!(%chat_id, payload = %payload, "upstream reported an error");
                }
                UpstreamFrame::Other { kind, .. } => {
                    trace!(%chat_id, kind = %kind, "ignoring upstream frame");
                }
            }
        }

        yield ChatEvent::Finish(finish);
        yield ChatEvent::Done;
    }
}

/// Run the poll on its own task and wait for it. Dropping the stream while
/// waiting aborts the task.
async fn run_poll(ctx: &StreamContext, job: ImageJob) -> Option<ImageRef> {
    let poller = ctx.poller.clone()?;
    let credential = ctx.credential.clone();
    let task = AbortOnDrop(tokio::spawn(async move {
        poller.poll(&job, &credential).await
    }));
    match task.join().await {
        Ok(image) => image,
        Err(e) => {
            warn!(chat_id = %ctx.session.id, error = %e, "image poll task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatbridge_auth::{ExpiryPolicy, Fingerprint, RawCookie, RawSession};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingPoller {
        calls: AtomicUsize,
        delay: Duration,
        image: Option<ImageRef>,
    }

    impl CountingPoller {
        fn new(image: Option<ImageRef>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                image,
            })
        }
    }

    #[async_trait]
    impl ImageJobPoller for CountingPoller {
        async fn poll(&self, _job: &ImageJob, _credential: &SessionCredential) -> Option<ImageRef> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.image.clone()
        }
    }

    fn credential() -> Arc<SessionCredential> {
        let raw = RawSession::new(vec![RawCookie::new("session_token", "tok")]);
        Arc::new(
            SessionCredential::from_raw(
                &raw,
                "session_token",
                &ExpiryPolicy::default(),
                Fingerprint::random(),
                chrono::Utc::now(),
                1,
            )
            .unwrap(),
        )
    }

    fn context(poller: Option<Arc<dyn ImageJobPoller>>) -> StreamContext {
        StreamContext {
            session: ChatSession::new("AkashGen"),
            credential: credential(),
            poller,
            min_suffix_match: 8,
        }
    }

    fn body(
        chunks: &[&'static str],
    ) -> impl Stream<Item = Result<Bytes, String>> + Send + 'static {
        let chunks: Vec<Result<Bytes, String>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        futures::stream::iter(chunks)
    }

    async fn collect(
        body: impl Stream<Item = Result<Bytes, String>> + Send + 'static,
        ctx: StreamContext,
    ) -> Vec<ChatEvent> {
        chat_events(body, ctx).collect().await
    }

    fn content(events: &[ChatEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Content(c) => Some(c.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cumulative_text_stream() {
        let events = collect(
            body(&["0:\"Hello\"\n0:\"Hello wor", "ld\"\nd:{\"finishReason\":\"stop\"}\n"]),
            context(None),
        )
        .await;

        assert_eq!(
            events,
            vec![
                ChatEvent::Role,
                ChatEvent::Content("Hello".to_string()),
                ChatEvent::Content(" world".to_string()),
                ChatEvent::Finish(FinishReason::Stop),
                ChatEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_reason_and_trailing_lines() {
        let events = collect(
            body(&["0:\"a\"\ne:{\"finishReason\":\"length\"}\n0:\"ignored\"\n"]),
            context(None),
        )
        .await;
        assert_eq!(content(&events), vec!["a"]);
        assert_eq!(events[events.len() - 2], ChatEvent::Finish(FinishReason::Length));
    }

    #[tokio::test]
    async fn test_body_without_terminator_still_finishes() {
        let events = collect(
            body(&["garbage line\n3:\"overloaded\"\n0:\"x\""]),
            context(None),
        )
        .await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Role,
                ChatEvent::Content("x".to_string()),
                ChatEvent::Finish(FinishReason::Stop),
                ChatEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_error_still_finishes() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"0:\"partial\"\n")),
            Err("connection reset".to_string()),
        ];
        let events = collect(futures::stream::iter(chunks), context(None)).await;
        assert_eq!(content(&events), vec!["partial"]);
        assert_eq!(events.last(), Some(&ChatEvent::Done));
    }

    #[tokio::test]
    async fn test_image_marker_polls_once() {
        let poller = CountingPoller::new(
            Some(ImageRef::Hosted("https://img.example.com/j1.jpeg".to_string())),
            Duration::ZERO,
        );
        let marker = "0:\"<image_generation> jobId='j1-a' prompt='a fox' negative=''\"\n";
        let events = collect(
            body(&[marker, marker, "0:\"done\"\nd:{}\n"]),
            context(Some(poller.clone())),
        )
        .await;

        assert_eq!(poller.calls.load(Ordering::SeqCst), 1);
        let texts = content(&events);
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0], "<think>\n🎨 Generating image...\n\nPrompt: a fox\n");
        assert!(texts[1].ends_with("![Generated Image](https://img.example.com/j1.jpeg)"));
        assert_eq!(texts[2], "done");
    }

    #[tokio::test]
    async fn test_image_failure_notice() {
        let poller = CountingPoller::new(None, Duration::ZERO);
        let events = collect(
            body(&["0:\"<image_generation> jobId='j2' prompt='p' negative='n'\"\n"]),
            context(Some(poller)),
        )
        .await;
        let texts = content(&events);
        assert_eq!(texts.len(), 2);
        assert!(texts[1].ends_with("*Image generation or upload failed.*\n"));
        assert!(!texts[1].contains("![Generated Image]"));
    }

    #[tokio::test]
    async fn test_dropping_stream_aborts_poll() {
        let poller = CountingPoller::new(None, Duration::from_secs(30));
        let stream = chat_events(
            body(&["0:\"<image_generation> jobId='j3' prompt='p' negative=''\"\n"]),
            context(Some(poller.clone())),
        );
        let mut stream = Box::pin(stream);

        assert_eq!(stream.next().await, Some(ChatEvent::Role));
        assert!(matches!(stream.next().await, Some(ChatEvent::Content(_))));
        // The poll is now running; give up on it.
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
        drop(stream);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(poller.calls.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&poller), 1);
    }
}
