use rumqttc::v5::mqttbytes::v5::{Filter, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::publish::FactSink;
use crate::shelly::{self, Generation};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not queue the subscription request")]
    Subscribe(#[source] rumqttc::v5::ClientError),
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// The mqtt broker to connect to.
    #[arg(long, default_value = "127.0.0.1")]
    mqtt_host: String,

    /// The port on which the broker listens.
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,

    /// The client identifier presented to the broker.
    #[arg(long, default_value = "shelly-bridge")]
    client_id: String,

    /// The mqtt keep-alive interval.
    #[arg(long, default_value = "30s")]
    keep_alive: humantime::Duration,

    /// Wait this long before polling the broker again after a connection
    /// error.
    #[arg(long, default_value = "1s")]
    reconnect_delay: humantime::Duration,
}

/// The broker connection and its event loop.
///
/// rumqttc reconnects by itself on the next poll; this wrapper adds the
/// (re)subscription on every ConnAck and feeds received messages into the
/// bridge.
pub struct Connection {
    pub client: AsyncClient,
    eventloop: EventLoop,
    args: Args,
}

impl Connection {
    pub fn new(args: Args) -> Connection {
        let mut options = MqttOptions::new(&args.client_id, &args.mqtt_host, args.mqtt_port);
        options.set_keep_alive(*args.keep_alive);
        let (client, eventloop) = AsyncClient::new(options, 64);
        Self { client, eventloop, args }
    }

    pub async fn run<S: FactSink>(mut self, bridge: &mut Bridge<S>) -> Result<(), Error> {
        info!(
            host = %self.args.mqtt_host,
            port = self.args.mqtt_port,
            "connecting to the broker"
        );
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to the broker, subscribing to shelly topics");
                    self.subscribe(bridge)?;
                }
                Ok(Event::Incoming(Packet::Publish(message))) => {
                    let Ok(topic) = str::from_utf8(&message.topic) else {
                        warn!("received a message with a non-utf-8 topic, ignoring");
                        continue;
                    };
                    bridge.handle_message(topic, &message.payload, message.qos, message.retain);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, "subscribed to topics");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        error = &e as &dyn std::error::Error,
                        "connection to the broker failed, will retry"
                    );
                    tokio::time::sleep(*self.args.reconnect_delay).await;
                }
            }
        }
    }

    /// Subscribes to the raw shelly namespaces and the normalized command
    /// namespace. No Local keeps the broker from echoing our own republishes
    /// back at us.
    fn subscribe<S: FactSink>(&self, bridge: &Bridge<S>) -> Result<(), Error> {
        let base = bridge.options().topic_base.as_str();
        let mut patterns = vec![format!("{}#", crate::topic::V1_NAMESPACE)];
        if base != crate::topic::V1_NAMESPACE {
            patterns.push(format!("{base}#"));
        }
        for (src, _dst) in bridge.topic_map().aliases() {
            let gen2 = shelly::classify(src)
                .map(|descriptor| descriptor.generation == Generation::V2)
                .unwrap_or(false);
            if gen2 {
                patterns.push(format!("{src}/events/rpc"));
            }
        }
        let filters = patterns.into_iter().map(|path| {
            debug!(topic = %path, "subscribing");
            let mut filter = Filter::new(path, QoS::AtMostOnce);
            filter.nolocal = true;
            filter
        });
        self.client.try_subscribe_many(filters).map_err(Error::Subscribe)
    }
}
