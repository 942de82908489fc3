use crate::bus::{Bus, BusStats};
use crate::prelude::*;
use crate::scheduler::Scheduler;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// How often the receive side of every bus is drained.
pub const TICK: Duration = Duration::from_millis(10);

/// Owns every bus and drives them from a single task.
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    buses: Vec<Bus>,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    /// Builds a bus per configured entry, using `open` for its transport.
    pub fn new<F>(
        config: ConfigWrapper,
        channels: Channels,
        clock: Arc<dyn Clock>,
        mut open: F,
    ) -> Result<Self>
    where
        F: FnMut(&config::Bus) -> Result<Box<dyn Transport>>,
    {
        let mut buses = Vec::new();
        let mut scheduler = Scheduler::new();
        let now = clock.now_ms();

        for (b, bus_config) in config.buses().iter().enumerate() {
            let transport = open(bus_config)?;
            buses.push(Bus::new(
                bus_config,
                transport,
                clock.clone(),
                channels.to_mqtt.clone(),
            ));

            for (d, device) in bus_config.devices().iter().enumerate() {
                if let Some(interval) = device.update_interval() {
                    scheduler.add(b, d, interval, now);
                }
            }
        }

        info!(
            "coordinator ready with {} buses, {} polled devices",
            buses.len(),
            scheduler.len()
        );

        Ok(Self {
            config,
            channels,
            buses,
            scheduler,
            clock,
        })
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn stats(&self) -> Vec<(String, BusStats)> {
        self.buses
            .iter()
            .map(|b| (b.name().to_owned(), b.stats().clone()))
            .collect()
    }

    pub fn print_summary(&self) {
        for bus in &self.buses {
            bus.stats().print_summary(bus.name());
        }
    }

    /// One pass of the main loop: drain receive buffers then run due polls.
    pub fn tick(&mut self) {
        for bus in self.buses.iter_mut() {
            bus.pump();
        }

        for (b, d) in self.scheduler.due(self.clock.now_ms()) {
            if let Some(bus) = self.buses.get_mut(b) {
                bus.update_device(d);
            }
        }
    }

    pub async fn start(&mut self, runtime: Option<Duration>) -> Result<()> {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut receiver = self.channels.from_mqtt.subscribe();
        let deadline = runtime.map(|r| tokio::time::Instant::now() + r);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                msg = receiver.recv() => match msg {
                    Ok(mqtt::ChannelData::Message(message)) => {
                        if let Err(err) = self.process_message(message) {
                            warn!("{}", err);
                        }
                    }
                    Ok(mqtt::ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                        info!("coordinator received shutdown signal");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("coordinator lagged, {} messages dropped", n);
                    }
                },
                _ = until(deadline) => {
                    info!("runtime limit reached");
                    break;
                }
            }
        }

        self.print_summary();
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_mqtt.send(mqtt::ChannelData::Shutdown);
    }

    pub fn process_message(&mut self, message: mqtt::Message) -> Result<()> {
        let meters = self.config.devices_with_power_topic(&message.topic);
        if !meters.is_empty() {
            let watts = message.payload_float()?;
            let mut result = Ok(());
            for meter in meters {
                if let Err(err) = self.process_command(Command::PowerReading(meter, watts)) {
                    warn!("{}", err);
                    result = Err(err);
                }
            }
            return result;
        }

        for device in self.config.devices_for_message(&message)? {
            match message.to_command(device) {
                Ok(command) => {
                    info!("parsed command {:?}", command);
                    let result = self.process_command(command.clone());
                    let payload = match result {
                        Ok(()) => "OK",
                        Err(err) => {
                            warn!("{}", err);
                            "FAIL"
                        }
                    };
                    self.publish_message(command.to_result_topic(), payload.to_owned(), false)?;
                }
                Err(err) => {
                    error!("{:?}", err);
                }
            }
        }

        Ok(())
    }

    pub fn process_command(&mut self, command: Command) -> Result<()> {
        let mut found = false;
        let mut failed = None;

        // every bus sees the command even if an earlier one fails
        for bus in self.buses.iter_mut() {
            match bus.apply(&command) {
                Ok(matched) => found |= matched,
                Err(err) => {
                    found = true;
                    warn!("bus {}: {}", bus.name(), err);
                    failed = Some(err);
                }
            }
        }

        if let Some(err) = failed {
            return Err(err);
        }
        if !found {
            bail!("no device named {}", command.device().name());
        }

        Ok(())
    }

    fn publish_message(&self, topic: String, payload: String, retain: bool) -> Result<()> {
        let m = mqtt::Message {
            topic,
            payload,
            retain,
        };
        if self.channels.to_mqtt.send(mqtt::ChannelData::Message(m)).is_err() {
            debug!("send(to_mqtt) failed - no subscribers");
        }
        Ok(())
    }
}

async fn until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
