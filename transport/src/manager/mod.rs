mod channel_map;
mod condemned_channels;
mod delayed_channels;
mod error;
mod irregular_channels;
mod keep_alive_channels;
mod monitored_channels;

pub use channel_map::ChannelMap;
pub use condemned_channels::CondemnedChannels;
pub use delayed_channels::DelayedChannels;
pub use error::ChannelMapError;
pub use irregular_channels::IrregularChannels;
pub use keep_alive_channels::{KeepAliveChannels, KeepAliveCheck};
pub use monitored_channels::MonitoredChannels;
