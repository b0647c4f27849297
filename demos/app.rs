//! Demo device application.
//!
//! ```bash
//! cargo run --example app -- --port 8080 --root ./web/
//! curl localhost:8080/hello
//! curl -d '{"x":1}' localhost:8080/up
//! curl localhost:8080/exit
//! ```

use clap::Parser;
use mhttpd::{AcceptMode, Reply, Request, Router, Server, ServerConfig, ServerHandle};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Command-line and environment settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "mhttpd-app")]
#[command(about = "Minimal HTTP/1.1 server demo")]
struct Args {
    /// Host/IP to listen on
    #[arg(long, default_value = "0.0.0.0", env = "MHTTPD_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "80", env = "MHTTPD_PORT")]
    port: u16,

    /// Directory static files are served from
    #[arg(long, default_value = "./web/", env = "MHTTPD_ROOT")]
    root: String,

    /// Seconds a client may stay silent before its request is dropped
    #[arg(long, default_value = "2", env = "MHTTPD_READ_TIMEOUT")]
    read_timeout: u64,

    /// Largest request body accepted, in bytes
    #[arg(long, default_value = "65536", env = "MHTTPD_MAX_BODY")]
    max_body: usize,

    /// Content-Encoding of the files under the root (e.g. gzip)
    #[arg(long, env = "MHTTPD_STATIC_ENCODING")]
    static_encoding: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::new(args.host, args.port)
        .document_root(args.root)
        .read_timeout(std::time::Duration::from_secs(args.read_timeout))
        .max_body(args.max_body)
        .accept_mode(AcceptMode::Foreground);
    if let Some(encoding) = args.static_encoding {
        config = config.static_encoding(encoding);
    }

    let handle = ServerHandle::new();
    let exit_handle = handle.clone();

    let mut router = Router::new();
    router
        .get("/hello", "application/json", |_req: Request| async {
            Ok(Reply::from(json!({"code": 0, "msg": "hello"})))
        })
        .post("/up", "application/json", |mut req: Request| async move {
            let data = req.read().await;
            Ok(Reply::from(json!({"code": 0, "msg": "up", "data": data})))
        })
        .get("/exit", "application/json", move |_req: Request| {
            exit_handle.stop();
            async { Ok(Reply::from(json!({"code": 0, "msg": "exited"}))) }
        });

    let mut server = Server::with_handle(config, router, handle);
    server.start().await?;
    Ok(())
}
