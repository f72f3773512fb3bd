//! Dedicated stream-reader task: one per active execution.
//!
//! Reads raw bytes from the engine socket (no read timeout once the
//! connection is up — the watchdog bounds total runtime), reassembles framed
//! units, classifies each one, and relays it to the originating connection
//! only. `EXECUTION_RESULT` is terminal: the parsed object is forwarded
//! as-is and the bridge is released.

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, warn};

use crate::execution::{bridge, framing::StreamReassembler};
use crate::messages;
use crate::state::AppState;
use crate::ws::broadcast;

const READ_BUF_SIZE: usize = 8192;

pub async fn run(mut read_half: OwnedReadHalf, state: AppState, connection_id: String) {
    debug!(connection_id = %connection_id, "output reader started");

    let mut buf = vec![0u8; READ_BUF_SIZE];
    // Raw bytes waiting for a complete UTF-8 boundary; a read can split a
    // multi-byte character.
    let mut pending: Vec<u8> = Vec::new();
    let mut assembler = StreamReassembler::new();
    let mut total_bytes = 0usize;

    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(connection_id = %connection_id, "end of stream from engine");
                break;
            }
            Ok(n) => {
                total_bytes += n;
                pending.extend_from_slice(&buf[..n]);
                let valid = match std::str::from_utf8(&pending) {
                    Ok(s) => s.len(),
                    Err(e) => e.valid_up_to(),
                };
                if valid == 0 {
                    continue;
                }
                let chunk = std::str::from_utf8(&pending[..valid]).unwrap_or_default();
                let units = assembler.push(chunk);
                pending.drain(..valid);
                for unit in units {
                    if dispatch_unit(&state, &connection_id, &unit).await {
                        debug!(connection_id = %connection_id, total_bytes, "output reader finished on terminal event");
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                info!(connection_id = %connection_id, "engine socket reset");
                break;
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "error reading engine stream");
                break;
            }
        }
    }

    // Flush whatever the stream left behind as one final unit.
    if let Some(remainder) = assembler.finish() {
        dispatch_unit(&state, &connection_id, &remainder).await;
    }

    bridge::teardown(&state, &connection_id, false).await;
    debug!(connection_id = %connection_id, total_bytes, "output reader completed");
}

/// Classify one reconstructed unit and relay it. Returns `true` when the
/// unit was terminal and the bridge has been released.
async fn dispatch_unit(state: &AppState, connection_id: &str, unit: &str) -> bool {
    if unit.starts_with("{\"type\":\"EXECUTION_RESULT\"") {
        return handle_execution_result(state, connection_id, unit).await;
    }
    for event in ["INPUT_REQUIRED", "OUTPUT", "ERROR", "COMPILE_SUCCESS"] {
        if unit.starts_with(&format!("{{\"type\":\"{event}\"")) {
            relay_json_event(state, connection_id, unit, event);
            return false;
        }
    }
    relay_plain_text(state, connection_id, unit);
    false
}

/// Terminal event: forward the engine's result object unchanged (plus a
/// timestamp if the engine omitted one) and release the session.
async fn handle_execution_result(state: &AppState, connection_id: &str, unit: &str) -> bool {
    let mut result: Value = match serde_json::from_str(unit) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) | Err(_) => {
            warn!(connection_id = %connection_id, raw = unit, "unparsable EXECUTION_RESULT from engine");
            return false;
        }
    };
    if let Some(map) = result.as_object_mut() {
        map.entry("timestamp")
            .or_insert_with(|| Value::from(messages::now_millis()));
    }
    info!(connection_id = %connection_id, status = %result["status"], "execution finished");
    broadcast::send_to_connection(&state.registry, connection_id, &result);
    bridge::teardown(state, connection_id, false).await;
    true
}

/// A structured (non-terminal) engine event: extract the message text and
/// relay it under the same type. Malformed JSON is logged and dropped.
fn relay_json_event(state: &AppState, connection_id: &str, unit: &str, event: &str) {
    let parsed: Value = match serde_json::from_str(unit) {
        Ok(v) => v,
        Err(e) => {
            warn!(connection_id = %connection_id, event, error = %e, raw = unit, "unparsable engine JSON unit");
            return;
        }
    };
    let message = parsed["message"].as_str().unwrap_or_default();
    let exit_code = parsed["exit_code"].as_i64();
    broadcast::send_to_connection(
        &state.registry,
        connection_id,
        &messages::engine_event(event, message, exit_code),
    );
}

/// Plain program output, classified by prefix.
fn relay_plain_text(state: &AppState, connection_id: &str, unit: &str) {
    let line = unit.trim();
    if let Some(error) = line.strip_prefix("COMPILE_ERROR:") {
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::engine_event("COMPILE_ERROR", error.trim(), None),
        );
    } else if line == "COMPILE_SUCCESS" {
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::engine_event("COMPILE_SUCCESS", "Code compiled successfully", None),
        );
    } else if !line.is_empty() {
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::engine_event("OUTPUT", line, None),
        );
    }
}
