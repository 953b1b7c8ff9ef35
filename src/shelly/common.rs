use rumqttc::v5::mqttbytes::QoS;
use serde_json::Value;
use tracing::{info, warn};

use super::DecodeCtx;

/// Internal temperature above which a device is reported as running `High`.
pub(crate) const HIGH_TEMP: f64 = 70.0;
/// Internal temperature above which a device is reported as `Very High`.
pub(crate) const VHIGH_TEMP: f64 = 85.0;

/// Fail-fast navigation to a required json key. A missing key logs and
/// returns `None`; the decoder must then abort the rest of the message.
pub(crate) fn required<'v>(model: &str, object: &'v Value, key: &str) -> Option<&'v Value> {
    let value = object.get(key);
    if value.is_none() {
        warn!(model, key, "expected key missing from json, dropping the message");
    }
    value
}

pub(crate) fn log_unknown_key(warn_level: bool, model: &str, key: &str) {
    if warn_level {
        warn!(model, key, "unknown key received, please report it so it can be ignored or implemented");
    } else {
        info!(model, key, "unknown key received, please report it so it can be ignored or implemented");
    }
}

pub(crate) fn temperature_status(temp_c: f64) -> &'static str {
    if temp_c > VHIGH_TEMP {
        "Very High"
    } else if temp_c > HIGH_TEMP {
        "High"
    } else {
        "Normal"
    }
}

/// Translates the `temperature` component shared by the power-metering
/// models: the raw readings in both scales plus a coarse status.
///
/// The status always goes out at qos 2 and retained, whatever the source
/// message carried.
pub(crate) fn publish_temperature(cx: &mut DecodeCtx<'_>, model: &str, value: &Value) -> Option<()> {
    let temp_c = required(model, value, "tC")?.as_f64().unwrap_or_default();
    let temp_f = required(model, value, "tF")?.as_f64().unwrap_or_default();
    cx.sink.publish_number(&cx.prefix, "temperature", temp_c, 1, cx.qos, cx.retain);
    cx.sink.publish_number(&cx.prefix, "temperature_f", temp_f, 1, cx.qos, cx.retain);
    cx.sink.publish_string(
        &cx.prefix,
        "temperature_status",
        temperature_status(temp_c),
        QoS::ExactlyOnce,
        true,
    );
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_bands_use_strict_comparison() {
        assert_eq!(temperature_status(HIGH_TEMP - 1.0), "Normal");
        assert_eq!(temperature_status(HIGH_TEMP), "Normal");
        assert_eq!(temperature_status(HIGH_TEMP + 1.0), "High");
        assert_eq!(temperature_status(VHIGH_TEMP), "High");
        assert_eq!(temperature_status(VHIGH_TEMP + 1.0), "Very High");
    }
}
