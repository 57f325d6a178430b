use super::{Response, SessionError};
use crate::frame::ErrorCode;
use crate::hpack::HeaderField;

use bytes::BytesMut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Complete,
    Reset(ErrorCode),
    /// The server sent GOAWAY without processing this stream.
    Refused(ErrorCode),
}

/// Collects the header blocks and body of one response stream.
#[derive(Debug)]
pub(crate) struct ResponseAccumulator {
    status: Option<u16>,
    headers: Vec<HeaderField>,
    trailers: Vec<HeaderField>,
    body: BytesMut,
    seen_headers: bool,
    outcome: Outcome,
}

impl ResponseAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            trailers: Vec::new(),
            body: BytesMut::new(),
            seen_headers: false,
            outcome: Outcome::Pending,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.outcome != Outcome::Pending
    }

    pub(crate) fn on_headers(&mut self, headers: Vec<HeaderField>, end_stream: bool) {
        if self.seen_headers {
            self.trailers
                .extend(headers.into_iter().filter(|h| !h.is_pseudo()));
        } else {
            let status = headers
                .iter()
                .find(|h| h.name == b":status")
                .and_then(|h| h.value_str())
                .and_then(|v| v.parse::<u16>().ok());

            // 1xx blocks precede the real response headers.
            if let Some(code) = status
                && (100..200).contains(&code)
                && !end_stream
            {
                return;
            }

            self.status = status;
            self.headers = headers.into_iter().filter(|h| !h.is_pseudo()).collect();
            self.seen_headers = true;
        }

        if end_stream {
            self.complete();
        }
    }

    pub(crate) fn on_data(&mut self, data: &[u8], end_stream: bool) {
        self.body.extend_from_slice(data);
        if end_stream {
            self.complete();
        }
    }

    pub(crate) fn complete(&mut self) {
        if self.outcome == Outcome::Pending {
            self.outcome = Outcome::Complete;
        }
    }

    pub(crate) fn reset(&mut self, code: ErrorCode) {
        if self.outcome == Outcome::Pending {
            self.outcome = Outcome::Reset(code);
        }
    }

    pub(crate) fn refuse(&mut self, code: ErrorCode) {
        if self.outcome == Outcome::Pending {
            self.outcome = Outcome::Refused(code);
        }
    }

    pub(crate) fn into_response(self) -> Result<Response, SessionError> {
        match self.outcome {
            Outcome::Complete => Ok(Response {
                status: self.status.unwrap_or(0),
                headers: self.headers,
                trailers: self.trailers,
                body: self.body.freeze(),
            }),
            Outcome::Reset(code) => Err(SessionError::StreamReset(code)),
            Outcome::Refused(code) => Err(SessionError::GoAway(code)),
            Outcome::Pending => Err(SessionError::Closed),
        }
    }
}
