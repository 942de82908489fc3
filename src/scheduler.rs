use std::time::Duration;

struct Entry {
    bus: usize,
    device: usize,
    interval_ms: u32,
    next_ms: u32,
}

/// Keeps track of when each polled device is due for its next update.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first update is due straight away.
    pub fn add(&mut self, bus: usize, device: usize, interval: Duration, now_ms: u32) {
        self.entries.push(Entry {
            bus,
            device,
            interval_ms: interval.as_millis().clamp(1, u32::MAX as u128) as u32,
            next_ms: now_ms,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (bus, device) pairs whose update is due, in registration order.
    pub fn due(&mut self, now_ms: u32) -> Vec<(usize, usize)> {
        let mut r = Vec::new();

        for entry in self.entries.iter_mut() {
            let late = now_ms.wrapping_sub(entry.next_ms);
            // anything past half the clock range is in the future
            if late > u32::MAX / 2 {
                continue;
            }

            r.push((entry.bus, entry.device));
            entry.next_ms = if late >= entry.interval_ms {
                // skip missed slots rather than firing a burst
                now_ms.wrapping_add(entry.interval_ms)
            } else {
                entry.next_ms.wrapping_add(entry.interval_ms)
            };
        }

        r
    }
}
