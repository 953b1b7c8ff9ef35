use serde_json::Value;
use tracing::warn;

use super::common::{log_unknown_key, publish_temperature, required};
use super::DecodeCtx;

const MODEL: &str = "plus1pm";

/// Translates a plus1pm status report into the flat relay topics.
///
/// The device has a single switch, so the component is always `switch:0` and
/// facts go under `relay/0`.
pub(crate) fn publish_status(cx: &mut DecodeCtx<'_>, payload: &str) {
    let Ok(root) = serde_json::from_str::<Value>(payload) else {
        warn!(model = MODEL, payload, "invalid json received");
        return;
    };
    let Some(params) = required(MODEL, &root, "params") else {
        return;
    };
    let Some(switch) = required(MODEL, params, "switch:0") else {
        return;
    };
    let Some(switch) = switch.as_object() else {
        warn!(model = MODEL, payload, "switch:0 is not an object");
        return;
    };
    for (key, value) in switch {
        match key.as_str() {
            "apower" => {
                let power = value.as_f64().unwrap_or_default();
                cx.sink.publish_number(&cx.prefix, "relay/0/power", power, 2, cx.qos, cx.retain);
            }
            "voltage" => {
                let voltage = value.as_f64().unwrap_or_default();
                cx.sink.publish_number(&cx.prefix, "relay/0/voltage", voltage, 2, cx.qos, cx.retain);
            }
            "output" => {
                let on = value.as_bool().unwrap_or_default();
                cx.sink.publish_bool(&cx.prefix, "relay/0", on, cx.qos, cx.retain);
            }
            "temperature" => {
                if publish_temperature(cx, MODEL, value).is_none() {
                    return;
                }
            }
            // Unusable fields the firmware always sends along.
            "id" | "source" | "timer_started_at" | "timer_duration" | "aenergy" => {}
            other => log_unknown_key(cx.unknown_key_warn, MODEL, other),
        }
    }
}
