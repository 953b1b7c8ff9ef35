use serde_json::Value;
use tracing::warn;

use super::common::{log_unknown_key, publish_temperature, required};
use super::DecodeCtx;

const MODEL: &str = "plus2pm";

/// Cover motion states the firmware reports.
#[derive(Clone, Copy, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
enum CoverMotion {
    Closing,
    Opening,
    Stopped,
}

impl CoverMotion {
    /// The generation-1 roller vocabulary the state is republished in.
    fn as_roller_state(self) -> &'static str {
        match self {
            CoverMotion::Closing => "close",
            CoverMotion::Opening => "open",
            CoverMotion::Stopped => "stop",
        }
    }
}

/// Translates a plus2pm (cover mode) status report into the roller topics.
pub(crate) fn publish_status(cx: &mut DecodeCtx<'_>, payload: &str) {
    let Ok(root) = serde_json::from_str::<Value>(payload) else {
        warn!(model = MODEL, payload, "invalid json received");
        return;
    };
    let Some(params) = required(MODEL, &root, "params") else {
        return;
    };
    // In cover mode there is only one cover, cover:0.
    let Some(cover) = required(MODEL, params, "cover:0") else {
        return;
    };
    let Some(cover) = cover.as_object() else {
        warn!(model = MODEL, payload, "cover:0 is not an object");
        return;
    };
    for (key, value) in cover {
        match key.as_str() {
            "apower" => {
                let power = value.as_f64().unwrap_or_default();
                cx.sink.publish_number(&cx.prefix, "roller/0/power", power, 2, cx.qos, cx.retain);
            }
            "current_pos" => {
                let pos = value.as_f64().unwrap_or_default();
                cx.sink.publish_number(&cx.prefix, "roller/0/pos", pos, 2, cx.qos, cx.retain);
            }
            "state" => {
                // Transitional states the firmware also reports
                // (e.g. calibrating) have no roller counterpart.
                let state = value.as_str().unwrap_or_default();
                if let Ok(motion) = state.parse::<CoverMotion>() {
                    let state = motion.as_roller_state();
                    cx.sink.publish_string(&cx.prefix, "roller/0", state, cx.qos, cx.retain);
                }
            }
            "voltage" => {
                let voltage = value.as_f64().unwrap_or_default();
                cx.sink.publish_number(&cx.prefix, "roller/0/voltage", voltage, 2, cx.qos, cx.retain);
            }
            "temperature" => {
                if publish_temperature(cx, MODEL, value).is_none() {
                    return;
                }
            }
            // Unusable fields the firmware always sends along.
            "id" | "source" | "timer_started_at" | "timer_duration" | "current"
            | "move_started_at" | "move_timeout" | "pf" | "timeout" | "target_pos"
            | "aenergy" => {}
            other => log_unknown_key(cx.unknown_key_warn, MODEL, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_motion_maps_to_roller_vocabulary() {
        assert_eq!("closing".parse::<CoverMotion>().unwrap().as_roller_state(), "close");
        assert_eq!("opening".parse::<CoverMotion>().unwrap().as_roller_state(), "open");
        assert_eq!("stopped".parse::<CoverMotion>().unwrap().as_roller_state(), "stop");
        assert!("calibrating".parse::<CoverMotion>().is_err());
    }
}
