//! Outgoing request bodies.

use crate::progress::Progress;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

enum Kind {
    Full(Full<Bytes>),
    Stream(BoxBody<Bytes, io::Error>),
}

/// Body of an outgoing request.
///
/// Encoded JSON, form and XML payloads are held in memory and can be replayed
/// when a redirect asks for the body again. Multipart bodies with file parts
/// stream from disk and cannot.
///
/// Every data frame handed to the connection is reported to the attached
/// [`Progress`], so an upload advances the handle while it is still in flight.
pub struct RequestBody {
    kind: Kind,
    length: u64,
    sent: u64,
    progress: Option<Progress>,
}

impl RequestBody {
    #[must_use]
    pub fn empty() -> Self {
        Self::full(Bytes::new())
    }

    /// In-memory body.
    #[must_use]
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            length: bytes.len() as u64,
            kind: Kind::Full(Full::new(bytes)),
            sent: 0,
            progress: None,
        }
    }

    /// Body read from `stream`, which must yield exactly `length` bytes.
    pub(crate) fn stream<S>(stream: S, length: u64) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self {
            kind: Kind::Stream(StreamBody::new(stream.map_ok(Frame::data)).boxed()),
            length,
            sent: 0,
            progress: None,
        }
    }

    /// Declared size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the body can be sent a second time.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        matches!(self.kind, Kind::Full(_))
    }

    /// A fresh copy of an in-memory body; `None` for streamed ones.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        match &self.kind {
            Kind::Full(body) => Some(Self {
                kind: Kind::Full(body.clone()),
                length: self.length,
                sent: 0,
                progress: self.progress.clone(),
            }),
            Kind::Stream(_) => None,
        }
    }

    /// Report frames sent from now on to `progress`.
    pub(crate) fn report_to(&mut self, progress: Progress) {
        if !self.is_empty() {
            progress.expect_upload();
        }
        self.progress = Some(progress);
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::full(bytes)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("length", &self.length)
            .field("sent", &self.sent)
            .field("replayable", &self.is_replayable())
            .finish_non_exhaustive()
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.get_mut();
        let polled: Poll<Option<Result<Frame<Bytes>, io::Error>>> = match &mut this.kind {
            Kind::Full(body) => Pin::new(body).poll_frame(cx).map_err(|never| match never {}),
            Kind::Stream(body) => Pin::new(body).poll_frame(cx),
        };
        if let Poll::Ready(Some(Ok(frame))) = &polled
            && let Some(data) = frame.data_ref()
        {
            this.sent += data.len() as u64;
            if let Some(progress) = &this.progress {
                progress.record_upload(this.sent, this.length);
            }
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Full(body) => body.is_end_stream(),
            Kind::Stream(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length.saturating_sub(self.sent))
    }
}
