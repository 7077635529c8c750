use crate::types::{ChannelKey, ReplyId};

mod context;
mod events;
mod network_interface;
mod packet_receiver;
mod request_manager;

pub use context::NetworkContext;
pub use events::{ChannelFinder, FinderResult, IncomingMessage, InterfaceEvent};
pub use network_interface::NetworkInterface;
pub use packet_receiver::PacketReceiver;
pub use request_manager::{ReplyHandler, RequestManager};

/// What a timer in the interface's `TimerQueue` fires for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerTarget {
    IrregularChannels,
    KeepAliveChannels,
    CondemnedChannels,
    InactivityCheck(ChannelKey),
    RequestTimeout(ReplyId),
    OffChannelEviction,
}
