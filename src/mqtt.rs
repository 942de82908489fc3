use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use std::collections::BTreeSet;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

#[derive(Debug, Eq, PartialEq)]
pub enum TargetDevice {
    Name(String),
    All,
}

impl Message {
    pub fn to_command(&self, device: config::Device) -> Result<Command> {
        use Command::*;

        let (_target, parts) = self.split_cmd_topic()?;

        let r = match parts[..] {
            ["read", "info"] => ReadInfo(device),
            ["read", "config"] => ReadConfig(device),
            ["set", "manual_mode"] => SetManualMode(device, self.payload_bool()),
            ["set", "emergency_power_off"] => SetEmergencyPowerOff(device, self.payload_bool()),
            ["set", "manual_power_demand"] => SetManualPowerDemand(device, self.payload_float()?),
            [..] => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }

    // given a cmd Message, return the device it is intended for.
    //
    // eg cmd/garage/set/manual_mode => (garage, ['set', 'manual_mode'])
    pub fn split_cmd_topic(&self) -> Result<(TargetDevice, Vec<&str>)> {
        let parts: Vec<&str> = self.topic.split('/').collect();

        if parts.len() < 2 || parts[0] != "cmd" {
            bail!("ignoring badly formed MQTT topic: {}", self.topic);
        }

        let device = parts[1];
        let rest = parts[2..].to_vec();

        if device == "all" {
            Ok((TargetDevice::All, rest))
        } else {
            Ok((TargetDevice::Name(device.to_owned()), rest))
        }
    }

    pub fn payload_float(&self) -> Result<f64> {
        self.payload
            .trim()
            .trim_matches('"')
            .parse()
            .map_err(|err| anyhow!("payload_float: {}", err))
    }

    pub fn payload_bool(&self) -> bool {
        matches!(
            self.payload.trim().to_ascii_lowercase().as_str(),
            "1" | "t" | "true" | "on" | "y" | "yes"
        )
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

const PUBLISH_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("solax-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        for topic in self.subscriptions() {
            debug!("subscribing to {}", topic);
            client.subscribe(topic, QoS::AtMostOnce).await?;
        }

        Ok(())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let namespace = self.config.mqtt().namespace().to_owned();

        let mut r = vec![format!("{}/cmd/all/#", namespace)];
        for device in self.config.devices() {
            r.push(format!("{}/cmd/{}/#", namespace, device.name()));
        }

        let power_topics: BTreeSet<String> = self
            .config
            .devices()
            .iter()
            .filter_map(|d| d.power_topic().map(str::to_owned))
            .collect();
        r.extend(power_topics);

        r
    }

    // mqtt -> coordinator
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_mqtt.subscribe();

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        self.handle_message(publish)?;
                    }
                    Err(e) => {
                        error!("{}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                    _ => {} // keepalives etc
                },
                msg = shutdown.recv() => {
                    if matches!(msg, Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    /// Forwards one incoming publish to the coordinator. Only a closed
    /// channel is an error; undecodable payloads are logged and dropped.
    pub fn handle_message(&self, publish: Publish) -> Result<()> {
        let payload = match String::from_utf8(publish.payload.to_vec()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("ignoring non UTF-8 payload on {}: {}", publish.topic, err);
                return Ok(());
            }
        };

        let message = Message {
            topic: self.local_topic(&publish.topic),
            retain: publish.retain,
            payload,
        };
        debug!("RX: {:?}", message);
        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    /// Strips our namespace from command topics. Power sensor topics are
    /// configured in full and passed through untouched.
    pub fn local_topic(&self, topic: &str) -> String {
        if !self.config.devices_with_power_topic(topic).is_empty() {
            return topic.to_owned();
        }

        let prefix = format!("{}/", self.config.mqtt().namespace());
        topic.strip_prefix(&prefix).unwrap_or(topic).to_owned()
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            let data = match receiver.recv().await {
                Ok(data) => data,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("mqtt sender lagged, {} messages dropped", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match data {
                Shutdown => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Message(message) => {
                    let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    for attempt in 1..=PUBLISH_ATTEMPTS {
                        match client
                            .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload.as_bytes())
                            .await
                        {
                            Ok(_) => break,
                            Err(err) => {
                                error!(
                                    "MQTT publish failed: {:?} (attempt {}/{})",
                                    err, attempt, PUBLISH_ATTEMPTS
                                );
                                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
