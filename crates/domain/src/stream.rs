use std::pin::Pin;

use serde::Serialize;

use crate::response::ModelResponse;

/// A boxed async stream, used for streaming model responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while a streaming response is in flight.
///
/// Ordering contract: every `TextDelta` precedes the final `Completed`;
/// no event follows an `Err` item or a cancellation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEvent {
    /// One visible text fragment, in wire arrival order.
    TextDelta { delta: String },

    /// A tool call finished assembling.
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },

    /// The final assembled response. Terminal.
    Completed { response: ModelResponse },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_wire_format() {
        let json = serde_json::to_value(ResponseEvent::TextDelta {
            delta: "hi".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["delta"], "hi");
    }
}
