/// Consecutive unanswered polls before a device is treated as offline.
pub const REDISCOVERY_THRESHOLD: u8 = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollAction {
    /// Ask the device for its status as usual.
    Query,
    /// Publish the offline state and broadcast discovery.
    Rediscover,
}

/// Counts polls since the last decoded answer.
///
/// Starts out at the threshold so the very first tick broadcasts discovery,
/// which assigns the inverter its address after a power cycle. Inverters
/// that already have one ignore the broadcast and answer the next query.
#[derive(Clone, Debug)]
pub struct Liveness {
    no_response_count: u8,
    threshold: u8,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(REDISCOVERY_THRESHOLD)
    }
}

impl Liveness {
    pub fn new(threshold: u8) -> Self {
        Self {
            no_response_count: threshold,
            threshold,
        }
    }

    pub fn tick(&mut self) -> PollAction {
        if self.no_response_count >= self.threshold {
            self.no_response_count = 0;
            PollAction::Rediscover
        } else {
            self.no_response_count += 1;
            PollAction::Query
        }
    }

    /// Called for every successfully decoded response.
    pub fn reset(&mut self) {
        self.no_response_count = 0;
    }

    pub fn is_responsive(&self) -> bool {
        self.no_response_count < self.threshold
    }

    pub fn no_response_count(&self) -> u8 {
        self.no_response_count
    }
}
