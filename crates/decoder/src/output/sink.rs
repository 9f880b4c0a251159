//! Downstream element sink.

use crate::common::error::Response;
use crate::element::TraceElement;

/// Consumer of generic trace elements.
///
/// The sink is called once per element, in generation order, and steers the
/// decoder through its [`Response`]: `Wait` pauses delivery without losing
/// decoder state, `Fatal` terminates the decoder instance.
pub trait ElementSink {
    /// Accept one element.
    ///
    /// `index` is the stream index of the packet that generated the
    /// element; `trace_id` identifies the stream the decoder is bound to.
    fn accept(&mut self, index: u64, trace_id: u8, elem: &TraceElement) -> Response;
}

impl<S: ElementSink + ?Sized> ElementSink for &mut S {
    fn accept(&mut self, index: u64, trace_id: u8, elem: &TraceElement) -> Response {
        (**self).accept(index, trace_id, elem)
    }
}
