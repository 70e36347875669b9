//! Local web UI and JSON API.
//!
//! A fixed pool of blocking worker threads shares the listener; each
//! worker accepts a request and drives the async router on the runtime
//! handle. Only one stage may run per run at a time.

mod api;

pub use api::AppState;

use anyhow::{Result, anyhow};
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest accepted request body.
const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;
/// How often the accept loop checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Requests handled at once. A running stage occupies its worker until it
/// finishes, so this also bounds concurrent stages.
const WORKERS: usize = 8;

/// Serve the UI on `host:port` until `shutdown` fires.
pub fn serve(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    open_browser: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{host}:{port}");
    let server = Server::http(&addr).map_err(|e| anyhow!("Failed to bind {addr}: {e}"))?;
    let url = format!("http://{addr}/");
    info!(%url, "web UI listening");
    eprintln!("COBOL to Java migration UI running at {url} (Ctrl-C to stop)");

    if open_browser && let Err(e) = open::that(&url) {
        warn!("Failed to open browser: {e}");
    }

    serve_on(server, &state, &shutdown)
}

/// Run the worker pool on a bound server until `shutdown` fires.
fn serve_on(server: Server, state: &AppState, shutdown: &CancellationToken) -> Result<()> {
    let server = &server;
    let result = thread::scope(|scope| {
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| scope.spawn(move || accept_loop(server, state, shutdown)))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or_else(|_| Err(anyhow!("web worker panicked"))))
            .collect::<Result<Vec<()>>>()
    });

    info!("web UI stopped");
    result.map(|_| ())
}

/// Handle requests until shutdown. An accept failure stops every worker.
fn accept_loop(server: &Server, state: &AppState, shutdown: &CancellationToken) -> Result<()> {
    while !shutdown.is_cancelled() {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => handle(state, request),
            Ok(None) => {}
            Err(e) => {
                shutdown.cancel();
                return Err(anyhow!("Failed to accept connection: {e}"));
            }
        }
    }
    Ok(())
}

fn handle(state: &AppState, mut request: Request) {
    let method = request.method().as_str().to_string();
    let path = request
        .url()
        .split(['?', '#'])
        .next()
        .unwrap_or("/")
        .to_string();

    let mut body = String::new();
    let read = request
        .as_reader()
        .take(MAX_BODY_BYTES)
        .read_to_string(&mut body);
    if let Err(e) = read {
        let reply = api::Reply::error(400, &format!("Unreadable request body: {e}"));
        respond(request, reply);
        return;
    }

    debug!(%method, %path, "request");
    let reply = state.runtime().block_on(api::route(state, &method, &path, &body));
    respond(request, reply);
}

fn respond(request: Request, reply: api::Reply) {
    let status = reply.status;
    let mut response = Response::from_data(reply.body).with_status_code(status);
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response = response.with_header(header);
    }
    if let Some(name) = reply.file_name {
        let value = format!("attachment; filename=\"{name}\"");
        if let Ok(header) = Header::from_bytes("Content-Disposition", value.as_bytes()) {
            response = response.with_header(header);
        }
    }
    if let Err(e) = request.respond(response) {
        debug!("Failed to send response ({status}): {e}");
    }
}
