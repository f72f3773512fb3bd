//! Lifecycle of one execution request against the external engine.
//!
//! `start` opens the engine socket (bounded connect), registers the session,
//! launches the stream reader, and writes the serialized request. Input
//! forwarding and stop/teardown operate on the session registered under the
//! originating connection id. A watchdog task bounds executions whose engine
//! side never reports a terminal event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::execution::{reader, ExecutionSession};
use crate::messages;
use crate::state::AppState;
use crate::ws::broadcast;

/// Watchdog floor: even with a short configured time limit, give the engine
/// this long before declaring the execution runaway.
const WATCHDOG_FLOOR: Duration = Duration::from_secs(600);
const WATCHDOG_POLL: Duration = Duration::from_secs(1);

/// Marker the editor appends to source submissions; never forwarded.
const END_CODE_SENTINEL: &str = "===END_CODE===";

/// What to run: one source file, or a named set of files.
#[derive(Debug)]
pub enum ExecutePayload {
    Single { code: String },
    Multi { files: HashMap<String, String> },
}

#[derive(Serialize)]
struct SingleFileRequest {
    code: String,
    time_limit: u64,
    memory_limit: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MultiFileRequest {
    files: HashMap<String, String>,
    time_limit_sec: u64,
    memory_limit_mb: u64,
}

/// Strip BOM and replacement characters plus the editor sentinel before the
/// source goes on the wire.
fn clean_source(code: &str) -> String {
    code.replace('\u{FEFF}', "")
        .replace('\u{FFFD}', "")
        .replace(END_CODE_SENTINEL, "")
        .trim()
        .to_string()
}

/// Run one execution end-to-end. Spawned off the connection's message loop
/// so client traffic stays responsive while the engine runs.
pub async fn start(state: AppState, connection_id: String, payload: ExecutePayload) {
    // At most one execution per connection: replace any active session.
    if teardown(&state, &connection_id, true).await {
        debug!(connection_id = %connection_id, "replaced a still-active execution session");
    }

    let engine = &state.engine;
    let addr = format!("{}:{}", engine.host, engine.port);
    info!(connection_id = %connection_id, addr = %addr, "connecting to execution engine");

    let connect = timeout(
        Duration::from_secs(engine.connect_timeout_secs),
        TcpStream::connect(&addr),
    )
    .await;
    let stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(connection_id = %connection_id, addr = %addr, error = %e, "execution engine connect failed");
            broadcast::send_to_connection(
                &state.registry,
                &connection_id,
                &messages::error("Execution engine unavailable. Please try again later."),
            );
            return;
        }
        Err(_) => {
            warn!(connection_id = %connection_id, addr = %addr, "execution engine connect timed out");
            broadcast::send_to_connection(
                &state.registry,
                &connection_id,
                &messages::error("Execution engine unavailable. Please try again later."),
            );
            return;
        }
    };

    broadcast::send_to_connection(
        &state.registry,
        &connection_id,
        &messages::execution_started(),
    );

    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let started_at = Instant::now();
    state.executions.insert(
        &connection_id,
        ExecutionSession {
            writer: writer.clone(),
            reader: None,
            started_at,
        },
    );

    let reader_handle = tokio::spawn(reader::run(
        read_half,
        state.clone(),
        connection_id.clone(),
    ));
    state.executions.attach_reader(&connection_id, reader_handle);

    let request = match serialize_request(&payload, engine.time_limit_secs, engine.memory_limit_mb)
    {
        Ok(body) => body,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "failed to serialize execution request");
            broadcast::send_to_connection(
                &state.registry,
                &connection_id,
                &messages::error("Failed to send code to execution engine"),
            );
            teardown(&state, &connection_id, true).await;
            return;
        }
    };

    // Guard scope: teardown below re-locks the same writer.
    let written = {
        let mut w = writer.lock().await;
        let write = async {
            w.write_all(request.as_bytes()).await?;
            w.flush().await
        };
        write.await
    };
    if let Err(e) = written {
        warn!(connection_id = %connection_id, error = %e, "failed to send execution request");
        broadcast::send_to_connection(
            &state.registry,
            &connection_id,
            &messages::error("Failed to send code to execution engine"),
        );
        teardown(&state, &connection_id, true).await;
        return;
    }
    debug!(connection_id = %connection_id, bytes = request.len(), "execution request sent");

    tokio::spawn(watchdog(state.clone(), connection_id, started_at));
}

fn serialize_request(
    payload: &ExecutePayload,
    time_limit: u64,
    memory_limit: u64,
) -> Result<String, serde_json::Error> {
    match payload {
        ExecutePayload::Single { code } => serde_json::to_string(&SingleFileRequest {
            code: clean_source(code),
            time_limit,
            memory_limit,
        }),
        ExecutePayload::Multi { files } => serde_json::to_string(&MultiFileRequest {
            files: files
                .iter()
                .map(|(name, source)| (name.clone(), clean_source(source)))
                .collect(),
            time_limit_sec: time_limit,
            memory_limit_mb: memory_limit,
        }),
    }
}

/// Forward interactive input to the running program, raw and unmodified.
pub async fn send_input(state: &AppState, connection_id: &str, input: &str) {
    let Some(writer) = state.executions.writer_of(connection_id) else {
        warn!(connection_id = %connection_id, "input with no active execution");
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::error("No active execution session"),
        );
        return;
    };

    let mut w = writer.lock().await;
    let write = async {
        w.write_all(input.as_bytes()).await?;
        w.flush().await
    };
    match write.await {
        Ok(()) => {
            broadcast::send_to_connection(
                &state.registry,
                connection_id,
                &messages::input_sent(input),
            );
        }
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "failed to forward input");
            broadcast::send_to_connection(
                &state.registry,
                connection_id,
                &messages::error(&format!("Failed to send input: {e}")),
            );
        }
    }
}

/// Force-stop the execution for a connection. Safe to call when nothing is
/// running; the client gets EXECUTION_STOPPED either way.
pub async fn stop(state: &AppState, connection_id: &str) {
    info!(connection_id = %connection_id, "stopping execution");
    teardown(state, connection_id, true).await;
    broadcast::send_to_connection(
        &state.registry,
        connection_id,
        &messages::execution_stopped(),
    );
}

/// Release the session for a connection id exactly once: shut the socket's
/// write half (the engine sees EOF and hangs up, which unblocks the reader)
/// and optionally cancel the reader task outright. Returns whether a live
/// session was actually torn down.
pub async fn teardown(state: &AppState, connection_id: &str, abort_reader: bool) -> bool {
    let Some(session) = state.executions.release(connection_id) else {
        return false;
    };
    if abort_reader {
        if let Some(handle) = &session.reader {
            handle.abort();
        }
    }
    let mut writer = session.writer.lock().await;
    let _ = writer.shutdown().await;
    debug!(connection_id = %connection_id, "execution session released");
    true
}

/// Bound a runaway execution: poll while the session stays registered and
/// force-fail it once elapsed time exceeds max(2 × time limit, the floor).
async fn watchdog(state: AppState, connection_id: String, started_at: Instant) {
    let bound = WATCHDOG_FLOOR.max(Duration::from_secs(state.engine.time_limit_secs * 2));
    loop {
        tokio::time::sleep(WATCHDOG_POLL).await;

        // Session gone, or the connection id was reused by a newer
        // execution: this watchdog is done.
        match state.executions.started_at(&connection_id) {
            Some(t) if t == started_at => {}
            _ => return,
        }

        if started_at.elapsed() > bound {
            warn!(connection_id = %connection_id, ?bound, "execution exceeded maximum wait time");
            broadcast::send_to_connection(
                &state.registry,
                &connection_id,
                &messages::error("Execution exceeded maximum wait time"),
            );
            teardown(&state, &connection_id, true).await;
            return;
        }
    }
}
