use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
};

use log::{info, warn};

use crate::{channel::ChannelStore, types::ChannelKey};

use super::ChannelMapError;

/// Maps peer addresses to the non-indexed channel talking to them, and
/// tracks which channels the map owns
#[derive(Default)]
pub struct ChannelMap {
    channels: HashMap<SocketAddr, ChannelKey>,
    owned: HashSet<ChannelKey>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, addr: &SocketAddr) -> Option<ChannelKey> {
        self.channels.get(addr).copied()
    }

    /// Registers `key` for `addr`. An address maps to at most one channel.
    pub fn add(&mut self, addr: SocketAddr, key: ChannelKey) -> Result<(), ChannelMapError> {
        if let Some(existing) = self.channels.get(&addr) {
            return Err(ChannelMapError::AddressInUse {
                addr,
                existing: *existing,
            });
        }
        self.channels.insert(addr, key);
        Ok(())
    }

    /// Unregisters `key` from `addr`
    pub fn remove(&mut self, addr: &SocketAddr, key: ChannelKey) -> Result<(), ChannelMapError> {
        match self.channels.get(addr) {
            None => Err(ChannelMapError::NotRegistered { addr: *addr }),
            Some(registered) if *registered != key => Err(ChannelMapError::Mismatch {
                addr: *addr,
                registered: *registered,
                requested: key,
            }),
            Some(_) => {
                self.channels.remove(addr);
                self.owned.remove(&key);
                Ok(())
            }
        }
    }

    /// Marks a channel as owned, so the map destroys it on shutdown
    pub fn set_owned(&mut self, key: ChannelKey, is_owned: bool) {
        if is_owned {
            self.owned.insert(key);
        } else {
            self.owned.remove(&key);
        }
    }

    pub fn is_owned(&self, key: ChannelKey) -> bool {
        self.owned.contains(&key)
    }

    /// Unregisters the channel for `addr` if it is anonymous and returns its
    /// key, handing it over to the caller
    pub fn del_anonymous(
        &mut self,
        addr: &SocketAddr,
        channels: &ChannelStore,
    ) -> Option<ChannelKey> {
        let key = self.find(addr)?;
        let is_anonymous = channels
            .get(&key)
            .map_or(false, |channel| channel.is_anonymous());
        if !is_anonymous {
            return None;
        }
        self.channels.remove(addr);
        self.owned.remove(&key);
        Some(key)
    }

    /// Whether any mapped channel is still waiting for acks
    pub fn has_unacked_packets(&self, channels: &ChannelStore) -> bool {
        self.channels.values().any(|key| {
            channels
                .get(key)
                .map_or(false, |channel| channel.has_unacked_packets())
        })
    }

    /// Empties the map, returning the owned channels for destruction.
    /// Channels still mapped without being owned are leaked by their owner.
    pub fn destroy_owned_channels(&mut self, channels: &ChannelStore) -> Vec<ChannelKey> {
        let mut to_destroy = Vec::new();
        for (addr, key) in self.channels.drain() {
            if self.owned.contains(&key) {
                to_destroy.push(key);
            } else if channels.contains_key(&key) {
                warn!(
                    "Channel {:?} to {} is still mapped but not owned by the map",
                    key, addr
                );
            }
        }
        self.owned.clear();
        if !to_destroy.is_empty() {
            info!("Destroying {} owned channels", to_destroy.len());
        }
        to_destroy
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        self.channels.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
