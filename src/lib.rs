//! # mhttpd
//!
//! A minimal HTTP/1.1 server for small devices. It serves one connection at a
//! time: accept, parse one request, answer it from a registered handler or
//! from a document root, close.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mhttpd::{Reply, Request, Router, Server, ServerConfig};
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/hello", "application/json", |_req: Request| async {
//!         Ok(Reply::from(json!({"code": 0, "msg": "hello"})))
//!     });
//!     router.post("/up", "application/json", |mut req: Request| async move {
//!         let data = req.read().await;
//!         Ok(Reply::from(json!({"code": 0, "msg": "up", "data": data})))
//!     });
//!
//!     let config = ServerConfig::new("0.0.0.0", 8080).document_root("./web/");
//!     Server::new(config, router).start().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod router;
pub mod server;
pub mod static_files;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{AcceptMode, ServerConfig};
pub use http::{Headers, Method, Request, StatusCode};
pub use router::{HandlerError, HandlerResult, Reply, Router};
pub use server::{Server, ServerError, ServerHandle};
