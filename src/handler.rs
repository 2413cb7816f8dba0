// src/handler.rs
use crate::http::ResponseData;
use crate::parser::ParsedRequest;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// The application bridge: one callback registered by the embedder, invoked
/// for every request the static path does not claim. Synchronous from the
/// engine's point of view.
pub type AppHandler = Arc<dyn Fn(&ParsedRequest) -> ResponseData + Send + Sync>;

/// Invoke the handler with a panic firewall. A panicking handler becomes a
/// 500; no handler at all is a 501.
pub fn dispatch(handler: Option<&AppHandler>, request: &ParsedRequest) -> ResponseData {
    let Some(handler) = handler else {
        return ResponseData::error(501, "No request handler configured");
    };

    match catch_unwind(AssertUnwindSafe(|| handler(request))) {
        Ok(response) => response,
        Err(panic) => {
            let msg = panic_message(&panic);
            error!(path = %request.path, panic = %msg, "application handler panicked");
            ResponseData::error(500, "Internal handler error")
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::parser::RequestParser;

    fn request() -> ParsedRequest {
        RequestParser::new()
            .parse(b"GET /x HTTP/1.1\r\n\r\n", b"")
            .unwrap()
    }

    #[test]
    fn test_dispatch_invokes_handler() {
        let handler: AppHandler = Arc::new(|req| {
            assert_eq!(req.method, Method::Get);
            ResponseData::ok("handled")
        });
        let resp = dispatch(Some(&handler), &request());
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body, b"handled");
    }

    #[test]
    fn test_missing_handler_is_501() {
        let resp = dispatch(None, &request());
        assert_eq!(resp.status_code, 501);
    }

    #[test]
    fn test_panicking_handler_becomes_500() {
        let handler: AppHandler = Arc::new(|_| panic!("boom"));
        let resp = dispatch(Some(&handler), &request());
        assert_eq!(resp.status_code, 500);
        assert!(String::from_utf8_lossy(&resp.body).contains("Error 500"));
    }
}
