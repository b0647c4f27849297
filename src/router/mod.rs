//! Route table: exact `(method, path)` → handler mapping.
//!
//! This module provides [`Router`], filled once at startup and then moved into
//! the [`Server`](crate::server::Server), after which it is only read.
//!
//! Matching is exact: the method case-insensitively (it is upper-cased on
//! both sides), the path byte for byte against the decoded request path,
//! trailing slash included. There are no patterns, wildcards or prefixes.
//! Registering the same `(method, path)` twice keeps the last handler.

use std::collections::HashMap;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::Request;
use crate::http::Method;

/// Error type handlers fail with. Any error can be returned with `?`.
pub type HandlerError = Box<dyn Error + Send + Sync + 'static>;

/// What a handler returns.
pub type HandlerResult = Result<Reply, HandlerError>;

/// Type-erased, heap-allocated async handler that processes a [`Request`] and
/// returns a [`HandlerResult`].
///
/// In practice you never construct this type directly; use
/// [`Router::register`] or one of the method helpers instead.
pub type Handler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = HandlerResult> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket
/// impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given request, boxing the returned future.
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> {
        Box::pin((self)(request))
    }
}

/// A handler's response body.
///
/// `Structured` values are sent as JSON text; `Raw` bytes are sent untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Structured(serde_json::Value),
    Raw(Bytes),
}

impl Reply {
    /// Builds a `Structured` reply from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Structured)
    }

    /// Builds a `Raw` reply.
    pub fn raw(body: impl Into<Bytes>) -> Self {
        Self::Raw(body.into())
    }

    /// A reply with no body.
    pub fn empty() -> Self {
        Self::Raw(Bytes::new())
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Self::Raw(Bytes::from(body))
    }
}

impl From<&'static str> for Reply {
    fn from(body: &'static str) -> Self {
        Self::Raw(Bytes::from_static(body.as_bytes()))
    }
}

impl From<Vec<u8>> for Reply {
    fn from(body: Vec<u8>) -> Self {
        Self::Raw(Bytes::from(body))
    }
}

/// A registered route.
#[derive(Clone)]
pub struct Route {
    method: Method,
    path: String,
    content_type: String,
    handler: Handler,
}

impl Route {
    /// Method this route answers.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Exact path this route answers.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Content type the handler's reply is sent with.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Starts the handler. The returned future owns everything it needs, so
    /// it can be spawned.
    pub fn invoke(&self, request: Request) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> {
        (self.handler)(request)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Exact-match route table.
///
/// # Examples
///
/// ```rust
/// use mhttpd::Request;
/// use mhttpd::router::{Reply, Router};
///
/// let mut router = Router::new();
/// router.get("/hello", "application/json", |_req: Request| async {
///     Ok(Reply::from(serde_json::json!({"code": 0, "msg": "hello"})))
/// });
///
/// assert!(router.lookup("get", "/hello").is_some());
/// assert!(router.lookup("GET", "/hello/").is_none());
/// assert!(router.lookup("POST", "/hello").is_none());
/// ```
#[derive(Default, Debug)]
pub struct Router {
    routes: HashMap<(Method, String), Route>,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` + `path`, replying with `content_type`.
    ///
    /// `method` is matched case-insensitively. An existing route with the same
    /// method and path is replaced.
    pub fn register(
        &mut self,
        method: &str,
        path: &str,
        content_type: &str,
        handler: impl IntoHandler,
    ) -> &mut Self {
        let method: Method = method.parse().unwrap_or_else(|never| match never {});
        self.add_route(method, path, content_type, handler);
        self
    }

    /// Register a handler for `GET` requests to `path`.
    pub fn get(&mut self, path: &str, content_type: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Get, path, content_type, handler);
        self
    }

    /// Register a handler for `POST` requests to `path`.
    pub fn post(&mut self, path: &str, content_type: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Post, path, content_type, handler);
        self
    }

    /// Register a handler for `PUT` requests to `path`.
    pub fn put(&mut self, path: &str, content_type: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Put, path, content_type, handler);
        self
    }

    /// Register a handler for `DELETE` requests to `path`.
    pub fn delete(&mut self, path: &str, content_type: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Delete, path, content_type, handler);
        self
    }

    // Erase the concrete handler type and store it as a `Handler` trait object.
    fn add_route(&mut self, method: Method, path: &str, content_type: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |req| handler.call(req));
        let route = Route {
            method: method.clone(),
            path: path.to_owned(),
            content_type: content_type.to_owned(),
            handler,
        };
        self.routes.insert((method, path.to_owned()), route);
    }

    /// Finds the route for `method` (any case) and the exact `path`.
    pub fn lookup(&self, method: &str, path: &str) -> Option<&Route> {
        let method: Method = method.parse().unwrap_or_else(|never| match never {});
        self.find(&method, path)
    }

    /// Finds the route for an already parsed method.
    pub fn find(&self, method: &Method, path: &str) -> Option<&Route> {
        // The key is owned; a lookup allocates one path string.
        self.routes.get(&(method.clone(), path.to_owned()))
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let raw: &'static [u8] = raw.into_bytes().leak();
        Request::parse(Box::new(raw), Duration::from_secs(1)).await.unwrap()
    }

    fn text(reply: Reply) -> Bytes {
        match reply {
            Reply::Raw(bytes) => bytes,
            Reply::Structured(value) => panic!("expected raw reply, got {value}"),
        }
    }

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn router_len_increments_on_add() {
        let mut router = Router::new();
        router
            .get("/a", "text/plain", |_req: Request| async { Ok(Reply::empty()) })
            .post("/b", "text/plain", |_req: Request| async { Ok(Reply::empty()) });
        assert_eq!(router.len(), 2);
        assert!(!router.is_empty());
    }

    #[test]
    fn method_is_case_insensitive() {
        let mut router = Router::new();
        router.register("post", "/up", "application/json", |_req: Request| async { Ok(Reply::empty()) });
        assert!(router.lookup("POST", "/up").is_some());
        assert!(router.lookup("Post", "/up").is_some());
        assert_eq!(router.lookup("post", "/up").unwrap().method(), &Method::Post);
    }

    #[test]
    fn path_is_exact() {
        let mut router = Router::new();
        router.get("/docs", "text/plain", |_req: Request| async { Ok(Reply::empty()) });
        assert!(router.lookup("GET", "/docs").is_some());
        assert!(router.lookup("GET", "/docs/").is_none());
        assert!(router.lookup("GET", "/Docs").is_none());
        assert!(router.lookup("GET", "/docs/sub").is_none());
        assert!(router.lookup("GET", "/doc").is_none());
    }

    #[test]
    fn method_must_match() {
        let mut router = Router::new();
        router.get("/hello", "text/plain", |_req: Request| async { Ok(Reply::empty()) });
        assert!(router.lookup("POST", "/hello").is_none());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut router = Router::new();
        router.get("/v", "text/plain", |_req: Request| async { Ok(Reply::from("first")) });
        router.register("GET", "/v", "text/csv", |_req: Request| async { Ok(Reply::from("second")) });
        assert_eq!(router.len(), 1);

        let route = router.lookup("GET", "/v").unwrap();
        assert_eq!(route.content_type(), "text/csv");
        let reply = route.invoke(make_request("GET", "/v").await).await.unwrap();
        assert_eq!(text(reply), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn handler_receives_request() {
        let mut router = Router::new();
        router.get("/echo", "text/plain", |req: Request| async move {
            Ok(Reply::from(req.param("q").unwrap_or_default().to_owned()))
        });
        let route = router.lookup("GET", "/echo").unwrap();
        let reply = route.invoke(make_request("GET", "/echo?q=hi").await).await.unwrap();
        assert_eq!(text(reply), Bytes::from_static(b"hi"));
    }

    async fn parse_count(_req: Request) -> HandlerResult {
        let n: u32 = "not a number".parse()?;
        Ok(Reply::json(&n)?)
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let mut router = Router::new();
        router.delete("/item", "application/json", parse_count);
        let route = router.lookup("DELETE", "/item").unwrap();
        assert!(route.invoke(make_request("DELETE", "/item").await).await.is_err());
    }

    #[test]
    fn reply_json_from_struct() {
        #[derive(Serialize)]
        struct Msg {
            code: i32,
            msg: &'static str,
        }
        let reply = Reply::json(&Msg { code: 0, msg: "ok" }).unwrap();
        assert_eq!(reply, Reply::Structured(serde_json::json!({"code": 0, "msg": "ok"})));
    }
}
