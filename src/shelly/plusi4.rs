use serde_json::Value;
use tracing::warn;

use super::common::required;
use super::DecodeCtx;

const MODEL: &str = "plusi4";

/// Translates a plusi4 status report into `input/<id>` topics.
///
/// The i4 runs its inputs in one of two modes. In switch mode a status
/// message carries an `input:<id>` component with the plain contact state,
/// which passes through as-is. In button mode the device reports press
/// events instead; only `btn_down` acts, and each one flips a per-input
/// toggle bit kept across messages, so the published value is a logical
/// on/off rather than "button is currently held".
pub(crate) fn publish_status(cx: &mut DecodeCtx<'_>, payload: &str) {
    let Ok(root) = serde_json::from_str::<Value>(payload) else {
        warn!(model = MODEL, payload, "invalid json received");
        return;
    };
    let Some(params) = required(MODEL, &root, "params") else {
        return;
    };
    match params.get("events") {
        Some(events) => publish_button_events(cx, events, payload),
        None => publish_switch_state(cx, params, payload),
    }
}

fn publish_button_events(cx: &mut DecodeCtx<'_>, events: &Value, payload: &str) {
    let Some(events) = events.as_array() else {
        warn!(model = MODEL, payload, "events is not an array");
        return;
    };
    for event in events {
        let Some(kind) = required(MODEL, event, "event") else {
            return;
        };
        if kind.as_str() != Some("btn_down") {
            continue;
        }
        let Some(id) = required(MODEL, event, "id") else {
            return;
        };
        let Some(id) = id.as_u64().filter(|id| *id < 32) else {
            warn!(model = MODEL, payload, "event input id is not a small integer");
            return;
        };
        let bit = 1u32 << id;
        let state = cx.button_state.toggle_state_mut(cx.src);
        *state ^= bit;
        let on = *state & bit != 0;
        cx.sink.publish_bool(&cx.prefix, &format!("input/{id}"), on, cx.qos, cx.retain);
    }
}

fn publish_switch_state(cx: &mut DecodeCtx<'_>, params: &Value, payload: &str) {
    for id in 0..4 {
        let Some(input) = params.get(format!("input:{id}")) else {
            continue;
        };
        let Some(state) = required(MODEL, input, "state") else {
            return;
        };
        let Some(state) = state.as_bool() else {
            warn!(model = MODEL, payload, "input state is not a boolean");
            return;
        };
        cx.sink.publish_bool(&cx.prefix, &format!("input/{id}"), state, cx.qos, cx.retain);
        return;
    }
    warn!(model = MODEL, payload, "input id not found in message");
}
