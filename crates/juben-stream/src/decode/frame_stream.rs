//! [`Stream`] that converts a stream of byte chunks into [`Frame`]s.

use core::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use std::collections::VecDeque;

use futures_core::Stream;

use super::decoder::{Frame, FrameDecoder};

pin_project_lite::pin_project! {
    /// A [`Stream`] that decodes a byte stream into [`Frame`]s.
    ///
    /// Transport errors from the inner stream are passed through unchanged;
    /// malformed lines never produce an error. When the inner stream ends,
    /// any unterminated tail is discarded.
    #[project = FrameStreamProjection]
    #[derive(Debug)]
    pub struct FrameStream<S> {
        #[pin]
        stream: S,
        decoder: FrameDecoder,
        ready: VecDeque<Frame>,
        scratch: Vec<Frame>,
        terminated: bool,
    }
}

impl<S> FrameStream<S> {
    /// Wrap an underlying byte stream with a fresh decoder.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            scratch: Vec::new(),
            terminated: false,
        }
    }

    /// Bytes buffered but not yet forming a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.decoder.buffered_len()
    }
}

impl<S, E, B> Stream for FrameStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<Frame, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if *this.terminated {
                return Poll::Ready(None);
            }

            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    this.decoder.feed_into(chunk.as_ref(), &mut *this.scratch);
                    this.ready.extend(this.scratch.drain(..));
                }
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => {
                    *this.terminated = true;
                    let _ = this.decoder.flush();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn frames_from_split_chunks() {
        let frames = FrameStream::new(futures_util::stream::iter(vec![
            Ok::<_, ()>(Bytes::from_static(b"data: {\"content\":\"Hel")),
            Ok::<_, ()>(Bytes::from_static(b"\"}\ndata: [DO")),
            Ok::<_, ()>(Bytes::from_static(b"NE]\n")),
        ]))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter_map(Result::ok)
        .collect::<Vec<_>>();

        assert_eq!(
            frames,
            vec![
                Frame::Data("{\"content\":\"Hel\"}".to_string()),
                Frame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn trailing_partial_frame_is_dropped() {
        let frames = FrameStream::new(futures_util::stream::iter(vec![Ok::<_, ()>(
            Bytes::from_static(b"data: one\ndata: two"),
        )]))
        .collect::<Vec<_>>()
        .await;

        assert_eq!(frames, vec![Ok(Frame::Data("one".to_string()))]);
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let mut stream = FrameStream::new(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n")),
            Err("reset"),
            Ok(Bytes::from_static(b"data: b\n")),
        ]));

        assert_eq!(stream.next().await, Some(Ok(Frame::Data("a".to_string()))));
        assert_eq!(stream.next().await, Some(Err("reset")));
        assert_eq!(stream.next().await, Some(Ok(Frame::Data("b".to_string()))));
        assert_eq!(stream.next().await, None);
    }
}
