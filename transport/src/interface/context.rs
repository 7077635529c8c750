use crate::{
    config::NetworkConfig,
    manager::{ChannelMap, CondemnedChannels, DelayedChannels, IrregularChannels, KeepAliveChannels},
    sender::{PacketSender, PacketSocket},
    timer::TimerQueue,
};

use super::{InterfaceEvent, RequestManager, TimerTarget};

/// Everything a channel needs from its interface while it sends, acks or
/// changes state. Owned by one `NetworkInterface`, lent to its channels.
pub struct NetworkContext {
    pub(crate) config: NetworkConfig,
    pub(crate) sender: PacketSender,
    pub(crate) timers: TimerQueue<TimerTarget>,
    pub(crate) requests: RequestManager,
    pub(crate) irregular: IrregularChannels,
    pub(crate) keep_alive: KeepAliveChannels,
    pub(crate) condemned: CondemnedChannels,
    pub(crate) delayed: DelayedChannels,
    pub(crate) channel_map: ChannelMap,
    pub(crate) events: Vec<InterfaceEvent>,
}

impl NetworkContext {
    pub fn new(socket: Box<dyn PacketSocket>, config: NetworkConfig) -> Self {
        Self {
            sender: PacketSender::new(socket, &config),
            timers: TimerQueue::new(),
            requests: RequestManager::new(),
            irregular: IrregularChannels::new(config.irregular_resend_period),
            keep_alive: KeepAliveChannels::new(&config.keep_alive),
            condemned: CondemnedChannels::new(&config.condemned),
            delayed: DelayedChannels::new(),
            channel_map: ChannelMap::new(),
            events: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn sender(&self) -> &PacketSender {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut PacketSender {
        &mut self.sender
    }

    pub fn requests(&self) -> &RequestManager {
        &self.requests
    }
}
