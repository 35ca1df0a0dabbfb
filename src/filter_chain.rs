//! Decoder/encoder filter chain.
//!
//! Modeled as an explicit `Vec<Box<dyn Filter>>` plus a cursor rather than
//! an intrusive linked list (the REDESIGN guidance in §9 calls the original
//! linked-list-plus-cursor design out as something Rust should express more
//! directly). Decoder filters see the request on its way to the upstream;
//! encoder filters see the response on its way back, in reverse
//! registration order — the same asymmetry the router/upstream codec filter
//! in `rp-http-filter.c`/`rp-router-filter-interface.h` implement.

use crate::request::RequestContext;

/// What a filter wants to happen to chain iteration after it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Proceed to the next filter immediately.
    Continue,
    /// Stop iterating this chain for the current data only; resume on the
    /// next call with fresh data.
    StopIteration,
    /// Stop iterating and buffer all further data until explicitly resumed
    /// (used while waiting on something async, like an upstream connect).
    StopAllIterationAndBuffer,
    /// Like `StopAllIterationAndBuffer`, but also raises the watermark so
    /// the other direction throttles.
    StopAllIterationAndWatermark,
}

/// A decoder-direction filter: inspects/mutates a request before it's sent upstream.
pub trait DecoderFilter: Send {
    /// Called once the request headers are fully parsed.
    fn decode_headers(&mut self, ctx: &mut RequestContext) -> FilterStatus;
}

/// An encoder-direction filter: inspects/mutates a response before it's sent downstream.
pub trait EncoderFilter: Send {
    /// Called once the response headers are available.
    fn encode_headers(&mut self, ctx: &mut RequestContext) -> FilterStatus;
}

/// The ordered set of filters applied to one request/response pair.
///
/// Decoder filters run front-to-back; encoder filters run back-to-front, so
/// the last filter registered sees the response first — the same
/// "innermost wraps outermost" discipline as the router's own filter
/// (always last in the decoder chain, first in the encoder chain).
pub struct FilterChain {
    decoders: Vec<Box<dyn DecoderFilter>>,
    encoders: Vec<Box<dyn EncoderFilter>>,
    decode_cursor: usize,
    encode_cursor: usize,
}

impl FilterChain {
    /// Builds a chain from decoder filters (front-to-back) and encoder
    /// filters (registered in the same front-to-back order they were added;
    /// `run_encoders` walks them back-to-front).
    pub fn new(decoders: Vec<Box<dyn DecoderFilter>>, encoders: Vec<Box<dyn EncoderFilter>>) -> Self {
        FilterChain {
            decoders,
            encoders,
            decode_cursor: 0,
            encode_cursor: 0,
        }
    }

    /// Resumes decoder iteration from the cursor, stopping early if a
    /// filter returns anything other than `Continue`.
    pub fn run_decoders(&mut self, ctx: &mut RequestContext) -> FilterStatus {
        while self.decode_cursor < self.decoders.len() {
            let status = self.decoders[self.decode_cursor].decode_headers(ctx);
            self.decode_cursor += 1;
            if status != FilterStatus::Continue {
                return status;
            }
        }
        FilterStatus::Continue
    }

    /// Resumes encoder iteration from the cursor, walking the chain in
    /// reverse registration order.
    pub fn run_encoders(&mut self, ctx: &mut RequestContext) -> FilterStatus {
        let len = self.encoders.len();
        while self.encode_cursor < len {
            let idx = len - 1 - self.encode_cursor;
            let status = self.encoders[idx].encode_headers(ctx);
            self.encode_cursor += 1;
            if status != FilterStatus::Continue {
                return status;
            }
        }
        FilterStatus::Continue
    }

    /// Whether every decoder filter has run to completion.
    pub fn decoders_complete(&self) -> bool {
        self.decode_cursor >= self.decoders.len()
    }

    /// Whether every encoder filter has run to completion.
    pub fn encoders_complete(&self) -> bool {
        self.encode_cursor >= self.encoders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingDecoder {
        name: &'static str,
        log: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
        stop_here: bool,
    }

    impl DecoderFilter for RecordingDecoder {
        fn decode_headers(&mut self, _ctx: &mut RequestContext) -> FilterStatus {
            self.log.lock().unwrap().push(self.name);
            if self.stop_here {
                FilterStatus::StopIteration
            } else {
                FilterStatus::Continue
            }
        }
    }

    struct RecordingEncoder {
        name: &'static str,
        log: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl EncoderFilter for RecordingEncoder {
        fn encode_headers(&mut self, _ctx: &mut RequestContext) -> FilterStatus {
            self.log.lock().unwrap().push(self.name);
            FilterStatus::Continue
        }
    }

    #[test]
    fn decoders_run_front_to_back() {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut chain = FilterChain::new(
            vec![
                Box::new(RecordingDecoder { name: "a", log: log.clone(), stop_here: false }),
                Box::new(RecordingDecoder { name: "b", log: log.clone(), stop_here: false }),
            ],
            vec![],
        );
        let mut ctx = RequestContext::new();
        assert_eq!(FilterStatus::Continue, chain.run_decoders(&mut ctx));
        assert_eq!(vec!["a", "b"], *log.lock().unwrap());
        assert!(chain.decoders_complete());
    }

    #[test]
    fn decoder_stop_iteration_halts_chain() {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut chain = FilterChain::new(
            vec![
                Box::new(RecordingDecoder { name: "a", log: log.clone(), stop_here: true }),
                Box::new(RecordingDecoder { name: "b", log: log.clone(), stop_here: false }),
            ],
            vec![],
        );
        let mut ctx = RequestContext::new();
        assert_eq!(FilterStatus::StopIteration, chain.run_decoders(&mut ctx));
        assert_eq!(vec!["a"], *log.lock().unwrap());
        assert!(!chain.decoders_complete());
    }

    #[test]
    fn encoders_run_back_to_front() {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut chain = FilterChain::new(
            vec![],
            vec![
                Box::new(RecordingEncoder { name: "first-registered", log: log.clone() }),
                Box::new(RecordingEncoder { name: "last-registered", log: log.clone() }),
            ],
        );
        let mut ctx = RequestContext::new();
        chain.run_encoders(&mut ctx);
        assert_eq!(vec!["last-registered", "first-registered"], *log.lock().unwrap());
    }
}
