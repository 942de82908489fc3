/// Anything a registry can route to.
pub trait Addressed {
    fn address(&self) -> u8;
}

/// What happened to a routed payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    Delivered(usize),
    Broadcast,
    Unknown,
}

/// Devices registered on one bus, in registration order.
///
/// Duplicate addresses are allowed and every matching device sees the
/// payload.
pub struct Registry<D> {
    devices: Vec<D>,
    broadcast: Option<u8>,
}

impl<D: Addressed> Registry<D> {
    /// `broadcast` is the address that must never reach a device, if the
    /// protocol has one.
    pub fn new(broadcast: Option<u8>) -> Self {
        Self {
            devices: Vec::new(),
            broadcast,
        }
    }

    pub fn register(&mut self, device: D) {
        self.devices.push(device);
    }

    /// Calls `deliver` for every device at `address`.
    pub fn route<F>(&mut self, address: u8, mut deliver: F) -> Route
    where
        F: FnMut(&mut D),
    {
        if self.broadcast == Some(address) {
            return Route::Broadcast;
        }

        let mut n = 0;
        for device in self.devices.iter_mut().filter(|d| d.address() == address) {
            deliver(device);
            n += 1;
        }

        if n == 0 {
            Route::Unknown
        } else {
            Route::Delivered(n)
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut D> {
        self.devices.get_mut(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, D> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, D> {
        self.devices.iter_mut()
    }
}
