use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: [TryHandle; 11] = [
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::classes::try_handle,
    handlers::students::try_handle,
    handlers::result_sets::try_handle,
    handlers::scores::try_handle,
    handlers::workflow::try_handle,
    handlers::results::try_handle,
    handlers::reports::try_handle,
    handlers::attendance::try_handle,
    handlers::cases::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    tracing::debug!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
