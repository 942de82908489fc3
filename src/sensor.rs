use crate::prelude::*;

/// A numeric output published to `<device>/<field>`.
#[derive(Clone, Debug)]
pub struct Sensor {
    topic: String,
    sender: mqtt::Sender,
}

impl Sensor {
    pub fn publish_state(&self, value: f64) {
        send(&self.sender, &self.topic, value.to_string());
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// A text output published to `<device>/<field>`.
#[derive(Clone, Debug)]
pub struct TextSensor {
    topic: String,
    sender: mqtt::Sender,
}

impl TextSensor {
    pub fn publish_state(&self, value: &str) {
        send(&self.sender, &self.topic, value.to_owned());
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

fn send(sender: &mqtt::Sender, topic: &str, payload: String) {
    let message = mqtt::Message {
        topic: topic.to_owned(),
        retain: false,
        payload,
    };
    // no subscribers simply means nobody is listening yet
    let _ = sender.send(mqtt::ChannelData::Message(message));
}

/// Absent sensors are legal and publishing to them does nothing.
pub fn publish(sensor: &Option<Sensor>, value: f64) {
    if let Some(sensor) = sensor {
        sensor.publish_state(value);
    }
}

pub fn publish_text(sensor: &Option<TextSensor>, value: &str) {
    if let Some(sensor) = sensor {
        sensor.publish_state(value);
    }
}

/// Hands out the sensors a device asked for in its config.
pub struct SensorFactory {
    device: String,
    enabled: Option<Vec<String>>,
    sender: mqtt::Sender,
}

impl SensorFactory {
    pub fn new(device: &config::Device, sender: mqtt::Sender) -> Self {
        Self {
            device: device.name().to_owned(),
            enabled: device.sensors().clone(),
            sender,
        }
    }

    fn wanted(&self, field: &str) -> bool {
        match &self.enabled {
            None => true,
            Some(list) => list.iter().any(|f| f == field),
        }
    }

    fn topic(&self, field: &str) -> String {
        format!("{}/{}", self.device, field)
    }

    pub fn sensor(&self, field: &str) -> Option<Sensor> {
        self.wanted(field).then(|| Sensor {
            topic: self.topic(field),
            sender: self.sender.clone(),
        })
    }

    pub fn text_sensor(&self, field: &str) -> Option<TextSensor> {
        self.wanted(field).then(|| TextSensor {
            topic: self.topic(field),
            sender: self.sender.clone(),
        })
    }

    /// Sends a whole document, used for device info and config dumps.
    pub fn publish_json<T: serde::Serialize>(&self, field: &str, value: &T) -> Result<()> {
        let message = mqtt::Message {
            topic: self.topic(field),
            retain: true,
            payload: serde_json::to_string(value)?,
        };
        let _ = self.sender.send(mqtt::ChannelData::Message(message));
        Ok(())
    }
}
