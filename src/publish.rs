use rumqttc::v5::mqttbytes::QoS;
use tracing::{trace, warn};

use crate::topic::DeviceTopic;

/// Where translated facts get published.
///
/// The dispatcher and decoders only ever see this trait; the production
/// implementation hands messages to the mqtt client, tests record them.
/// Publishing is fire and forget: a failed hand-off is logged and the rest of
/// the message keeps processing.
pub trait FactSink {
    fn publish_raw(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool);

    /// Publishes a boolean as `on`/`off` under `prefix` + `sub`.
    fn publish_bool(&self, prefix: &DeviceTopic, sub: &str, value: bool, qos: QoS, retain: bool) {
        let topic = prefix.join(sub);
        let payload = if value { "on" } else { "off" };
        trace!(%topic, payload, "publishing bool");
        self.publish_raw(&topic, payload.as_bytes(), qos, retain);
    }

    /// Publishes a number rendered with a fixed `precision`.
    fn publish_number(
        &self,
        prefix: &DeviceTopic,
        sub: &str,
        value: f64,
        precision: usize,
        qos: QoS,
        retain: bool,
    ) {
        let topic = prefix.join(sub);
        let payload = format!("{value:.precision$}");
        trace!(%topic, %payload, "publishing number");
        self.publish_raw(&topic, payload.as_bytes(), qos, retain);
    }

    fn publish_string(&self, prefix: &DeviceTopic, sub: &str, value: &str, qos: QoS, retain: bool) {
        let topic = prefix.join(sub);
        trace!(%topic, payload = value, "publishing string");
        self.publish_raw(&topic, value.as_bytes(), qos, retain);
    }
}

/// [`FactSink`] backed by the rumqttc client request queue.
pub struct MqttSink {
    client: rumqttc::v5::AsyncClient,
}

impl MqttSink {
    pub fn new(client: rumqttc::v5::AsyncClient) -> Self {
        Self { client }
    }
}

impl FactSink for MqttSink {
    fn publish_raw(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) {
        let result = self.client.try_publish(topic, qos, retain, payload.to_vec());
        if let Err(e) = result {
            warn!(
                topic,
                error = &e as &dyn std::error::Error,
                "could not hand the message over to the mqtt client"
            );
        }
    }
}
