//! Method shape as supplied by the schema layer.
//!
//! The session never interprets message payloads, so the only thing it
//! needs to know about a method is its request path and which of the
//! two directions stream.

/// Shape of the method being invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Request path, `/package.Service/Method`.
    pub path: String,
    /// Whether the client may send more than one message.
    pub client_streaming: bool,
    /// Whether the server may send more than one message.
    pub server_streaming: bool,
}

impl MethodDescriptor {
    /// Build a descriptor from a fully qualified service name and a
    /// method name.
    pub fn new(
        service: &str,
        method: &str,
        client_streaming: bool,
        server_streaming: bool,
    ) -> Self {
        Self {
            path: format!("/{service}/{method}"),
            client_streaming,
            server_streaming,
        }
    }

    /// Neither side streams: one request, one response.
    pub fn is_unary(&self) -> bool {
        !self.client_streaming && !self.server_streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_follows_the_request_path_convention() {
        let method = MethodDescriptor::new("routeguide.RouteGuide", "GetFeature", false, false);
        assert_eq!(method.path, "/routeguide.RouteGuide/GetFeature");
        assert!(method.is_unary());
    }
}
