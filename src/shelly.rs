mod common;
mod plus1pm;
mod plus2pm;
mod plusi4;

use rumqttc::v5::mqttbytes::QoS;
use tracing::warn;

use crate::id_map::IdMap;
use crate::publish::FactSink;
use crate::topic::DeviceTopic;

/// Shelly firmware family. Generation 1 speaks plain key/value topics under
/// `shellies/`, generation 2 speaks JSON-RPC under `<id>/events/rpc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    V1,
    V2,
}

/// Everything a per-model decoder needs to translate one status message.
pub struct DecodeCtx<'a> {
    pub sink: &'a dyn FactSink,
    /// Button toggle bits, keyed by raw device id. Mutated by plusi4 button
    /// events only.
    pub button_state: &'a mut IdMap,
    /// Raw device id the message came from.
    pub src: &'a str,
    /// `<topic_base><alias-or-raw>/` prefix translated facts go under.
    pub prefix: DeviceTopic,
    pub qos: QoS,
    pub retain: bool,
    /// Log unexpected payload keys at warning level instead of info.
    pub unknown_key_warn: bool,
}

pub type DecodeFn = fn(&mut DecodeCtx<'_>, &str);

pub struct ModelDescriptor {
    pub id_prefix: &'static str,
    pub generation: Generation,
    pub decode: Option<DecodeFn>,
}

/// Supported device models. First prefix match in declaration order wins, so
/// more specific prefixes must come before shorter overlapping ones.
pub static MODELS: &[ModelDescriptor] = &[
    ModelDescriptor { id_prefix: "shellyswitch25", generation: Generation::V1, decode: None },
    ModelDescriptor { id_prefix: "shellyplug", generation: Generation::V1, decode: None },
    ModelDescriptor { id_prefix: "shellyem3", generation: Generation::V1, decode: None },
    ModelDescriptor {
        id_prefix: "shellyplus1pm",
        generation: Generation::V2,
        decode: Some(plus1pm::publish_status),
    },
    ModelDescriptor {
        id_prefix: "shellyplus2pm",
        generation: Generation::V2,
        decode: Some(plus2pm::publish_status),
    },
    ModelDescriptor {
        id_prefix: "shellyplusi4",
        generation: Generation::V2,
        decode: Some(plusi4::publish_status),
    },
];

/// Looks a raw device id up in the model table.
///
/// An unknown id logs a warning and returns `None`; the caller must drop the
/// message rather than fail.
pub fn classify(device_id: &str) -> Option<&'static ModelDescriptor> {
    let found = MODELS.iter().find(|m| device_id.starts_with(m.id_prefix));
    if found.is_none() {
        warn!(device_id, "unknown shelly id, please report this so it can be supported");
    }
    found
}

/// Derives the bare model name from a raw device id by dropping the mac
/// suffix and the `shelly` vendor prefix, e.g.
/// `shellyplus1pm-7c87ce65bd9c` → `plus1pm`.
pub fn model_name(device_id: &str) -> &str {
    let base = device_id.split_once('-').map_or(device_id, |(model, _mac)| model);
    base.strip_prefix("shelly").unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_name_is_pure_and_deterministic() {
        assert_eq!(model_name("shellyplus1pm-7c87ce65bd9c"), "plus1pm");
        assert_eq!(model_name("shellyplus1pm-7c87ce65bd9c"), "plus1pm");
        assert_eq!(model_name("shellyplusi4-aabbccddeeff"), "plusi4");
        assert_eq!(model_name("shellyplug-AB12"), "plug");
        assert_eq!(model_name("shellyplug"), "plug");
    }

    #[test]
    fn classify_matches_by_prefix() {
        let desc = classify("shellyplus1pm-7c87ce65bd9c").unwrap();
        assert_eq!(desc.generation, Generation::V2);
        assert!(desc.decode.is_some());

        let desc = classify("shellyplug-AB12").unwrap();
        assert_eq!(desc.generation, Generation::V1);
        assert!(desc.decode.is_none());
    }

    #[test]
    fn classify_rejects_unknown_prefixes() {
        assert!(classify("shellyfoo-AB12").is_none());
        assert!(classify("sonoff-AB12").is_none());
    }

    #[test]
    fn specific_prefixes_are_declared_before_generic_ones() {
        // shellyswitch25 must not fall through to a shorter prefix.
        let desc = classify("shellyswitch25-AB12").unwrap();
        assert_eq!(desc.id_prefix, "shellyswitch25");
    }
}
