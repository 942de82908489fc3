pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write as _;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::{
    channels::Channels,
    checksum,
    command::Command,
    config::{self, Config, ConfigWrapper},
    mqtt,
    options::Options,
    solax::serial::SerialNumber,
    transport::{self, Clock, Transport},
    utils::Utils,
};
