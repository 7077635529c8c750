use crate::{
    constants::{PACKET_HEADER_SIZE, PACKET_MAX_SIZE},
    types::{ChannelId, ChannelVersion, CHANNEL_ID_NULL},
    wrapping_number::{SeqNum, SEQ_NULL},
};

use super::{PacketError, PacketFlags};

const SEQ_SIZE_BYTES: usize = 4;
const PIGGYBACK_LENGTH_SIZE: usize = 2;

/// A single datagram: a flags header, an opaque payload of framed messages
/// and the footers described by the flags.
///
/// On the wire footers are appended after the payload and stripped from the
/// end in this order: piggybacks, indexed channel, cumulative ack, acks,
/// sequence number, fragment range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    flags: PacketFlags,
    body: Vec<u8>,
    seq: SeqNum,
    fragment_begin: SeqNum,
    fragment_end: SeqNum,
    acks: Vec<SeqNum>,
    cumulative_ack: SeqNum,
    channel_id: ChannelId,
    channel_version: ChannelVersion,
    piggybacks: Vec<Packet>,
    is_piggyback: bool,
    footer_reserve: usize,
}

impl Packet {
    pub fn new() -> Self {
        Self {
            flags: PacketFlags::default(),
            body: Vec::new(),
            seq: SEQ_NULL,
            fragment_begin: SEQ_NULL,
            fragment_end: SEQ_NULL,
            acks: Vec::new(),
            cumulative_ack: SEQ_NULL,
            channel_id: CHANNEL_ID_NULL,
            channel_version: 0,
            piggybacks: Vec::new(),
            is_piggyback: false,
            footer_reserve: 0,
        }
    }

    /// Builds the packet embedded in a newer packet to resend the reliable
    /// payload of `seq`
    pub fn new_piggyback(seq: SeqNum, body: Vec<u8>, piggybacks: Vec<Packet>) -> Self {
        let mut packet = Self::new();
        packet.flags.insert(
            PacketFlags::IS_RELIABLE | PacketFlags::HAS_SEQUENCE_NUMBER | PacketFlags::ON_CHANNEL,
        );
        packet.seq = seq;
        packet.body = body;
        for piggyback in piggybacks {
            packet.add_piggyback(piggyback);
        }
        packet
    }

    // Flags

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn has_flags(&self, flags: u16) -> bool {
        self.flags.contains(flags)
    }

    pub fn enable_flags(&mut self, flags: u16) {
        self.flags.insert(flags);
    }

    pub fn disable_flags(&mut self, flags: u16) {
        self.flags.remove(flags);
    }

    pub fn is_reliable(&self) -> bool {
        self.has_flags(PacketFlags::IS_RELIABLE)
    }

    pub fn is_on_channel(&self) -> bool {
        self.has_flags(PacketFlags::ON_CHANNEL)
    }

    pub fn is_fragment(&self) -> bool {
        self.has_flags(PacketFlags::IS_FRAGMENT)
    }

    /// Whether this packet asks the receiver to create a channel for it
    pub fn should_create_anonymous(&self) -> bool {
        self.has_flags(PacketFlags::ON_CHANNEL | PacketFlags::CREATE_CHANNEL)
            && !self.has_flags(PacketFlags::INDEXED_CHANNEL)
    }

    // Payload

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Whether the packet carries nothing the receiver needs to process
    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && !self.is_reliable() && self.piggybacks.is_empty()
    }

    // Footers

    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    pub fn set_seq(&mut self, seq: SeqNum) {
        self.seq = seq;
    }

    pub fn fragment_begin(&self) -> SeqNum {
        self.fragment_begin
    }

    pub fn fragment_end(&self) -> SeqNum {
        self.fragment_end
    }

    pub fn set_fragment_range(&mut self, begin: SeqNum, end: SeqNum) {
        self.enable_flags(PacketFlags::IS_FRAGMENT);
        self.fragment_begin = begin;
        self.fragment_end = end;
    }

    pub fn acks(&self) -> &[SeqNum] {
        &self.acks
    }

    pub fn add_ack(&mut self, seq: SeqNum) {
        self.enable_flags(PacketFlags::HAS_ACKS);
        self.acks.push(seq);
    }

    pub fn cumulative_ack(&self) -> SeqNum {
        self.cumulative_ack
    }

    pub fn set_cumulative_ack(&mut self, seq: SeqNum) {
        self.enable_flags(PacketFlags::HAS_CUMULATIVE_ACK);
        self.cumulative_ack = seq;
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn channel_version(&self) -> ChannelVersion {
        self.channel_version
    }

    pub fn set_indexed_channel(&mut self, id: ChannelId, version: ChannelVersion) {
        self.enable_flags(PacketFlags::INDEXED_CHANNEL);
        self.channel_id = id;
        self.channel_version = version;
    }

    /// Refreshes the indexed channel footer before a resend
    pub fn update_channel_version(&mut self, version: ChannelVersion, id: ChannelId) {
        if self.has_flags(PacketFlags::INDEXED_CHANNEL) {
            self.channel_id = id;
            self.channel_version = version;
        }
    }

    pub fn piggybacks(&self) -> &[Packet] {
        &self.piggybacks
    }

    pub fn take_piggybacks(&mut self) -> Vec<Packet> {
        self.disable_flags(PacketFlags::HAS_PIGGYBACKS);
        std::mem::take(&mut self.piggybacks)
    }

    pub fn add_piggyback(&mut self, piggyback: Packet) {
        self.enable_flags(PacketFlags::HAS_PIGGYBACKS);
        self.piggybacks.push(piggyback);
    }

    pub fn is_piggyback(&self) -> bool {
        self.is_piggyback
    }

    /// Extra bytes kept free at the end of the packet, e.g. for a filter
    pub fn set_footer_reserve(&mut self, reserve: usize) {
        self.footer_reserve = reserve;
    }

    /// Size of this packet once embedded in another one
    pub fn piggyback_size(&self) -> usize {
        self.encoded_size() + PIGGYBACK_LENGTH_SIZE
    }

    /// Size of the packet on the wire
    pub fn encoded_size(&self) -> usize {
        let mut size = PACKET_HEADER_SIZE + self.body.len();
        if self.has_flags(PacketFlags::IS_FRAGMENT) {
            size += 2 * SEQ_SIZE_BYTES;
        }
        if self.has_flags(PacketFlags::HAS_SEQUENCE_NUMBER) {
            size += SEQ_SIZE_BYTES;
        }
        if self.has_flags(PacketFlags::HAS_ACKS) {
            size += 1 + SEQ_SIZE_BYTES * self.acks.len();
        }
        if self.has_flags(PacketFlags::HAS_CUMULATIVE_ACK) {
            size += SEQ_SIZE_BYTES;
        }
        if self.has_flags(PacketFlags::INDEXED_CHANNEL) {
            size += 8;
        }
        size + self
            .piggybacks
            .iter()
            .map(Packet::piggyback_size)
            .sum::<usize>()
    }

    /// Bytes still available for footers
    pub fn free_space(&self) -> usize {
        PACKET_MAX_SIZE.saturating_sub(self.encoded_size() + self.footer_reserve)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        out.extend_from_slice(&self.flags.bits().to_be_bytes());
        out.extend_from_slice(&self.body);

        if self.has_flags(PacketFlags::IS_FRAGMENT) {
            out.extend_from_slice(&self.fragment_begin.to_be_bytes());
            out.extend_from_slice(&self.fragment_end.to_be_bytes());
        }
        if self.has_flags(PacketFlags::HAS_SEQUENCE_NUMBER) {
            out.extend_from_slice(&self.seq.to_be_bytes());
        }
        if self.has_flags(PacketFlags::HAS_ACKS) {
            for ack in self.acks.iter().rev() {
                out.extend_from_slice(&ack.to_be_bytes());
            }
            out.push(self.acks.len() as u8);
        }
        if self.has_flags(PacketFlags::HAS_CUMULATIVE_ACK) {
            out.extend_from_slice(&self.cumulative_ack.to_be_bytes());
        }
        if self.has_flags(PacketFlags::INDEXED_CHANNEL) {
            out.extend_from_slice(&self.channel_version.to_be_bytes());
            out.extend_from_slice(&self.channel_id.to_be_bytes());
        }
        if self.has_flags(PacketFlags::HAS_PIGGYBACKS) {
            let last = self.piggybacks.len().saturating_sub(1);
            for (index, piggyback) in self.piggybacks.iter().enumerate().rev() {
                let bytes = piggyback.encode();
                let length = bytes.len() as i16;
                out.extend_from_slice(&bytes);
                let length = if index == last { !length } else { length };
                out.extend_from_slice(&length.to_be_bytes());
            }
        }

        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(PacketError::Undersized { size: data.len() });
        }

        let flags = PacketFlags::from_bits(u16::from_be_bytes([data[0], data[1]]));
        if flags.unknown() != 0 {
            return Err(PacketError::UnknownFlags {
                flags: flags.bits(),
            });
        }

        let mut packet = Self::new();
        packet.flags = flags;
        let mut footers = FooterReader::new(data);

        if flags.contains(PacketFlags::HAS_PIGGYBACKS) {
            loop {
                let raw = footers.strip_i16("piggyback length")?;
                let is_last = raw < 0;
                let length = if is_last { !raw } else { raw };
                if (length as usize) < PACKET_HEADER_SIZE || length as usize > footers.remaining()
                {
                    return Err(PacketError::InvalidPiggybackLength {
                        length: i32::from(length),
                        remaining: footers.remaining(),
                    });
                }
                let mut piggyback = Packet::decode(footers.strip_bytes(length as usize))?;
                piggyback.is_piggyback = true;
                packet.piggybacks.push(piggyback);
                if is_last {
                    break;
                }
            }
        }
        if flags.contains(PacketFlags::INDEXED_CHANNEL) {
            packet.channel_id = footers.strip_i32("channel id")?;
            packet.channel_version = footers.strip_u32("channel version")?;
        }
        if flags.contains(PacketFlags::HAS_CUMULATIVE_ACK) {
            packet.cumulative_ack = footers.strip_u32("cumulative ack")?;
        }
        if flags.contains(PacketFlags::HAS_ACKS) {
            let count = footers.strip_u8("ack count")?;
            if count == 0 {
                return Err(PacketError::ZeroAcks);
            }
            for _ in 0..count {
                packet.acks.push(footers.strip_u32("ack")?);
            }
        }
        if flags.contains(PacketFlags::HAS_SEQUENCE_NUMBER) {
            packet.seq = footers.strip_u32("sequence number")?;
        }
        if flags.contains(PacketFlags::IS_FRAGMENT) {
            packet.fragment_end = footers.strip_u32("fragment end")?;
            packet.fragment_begin = footers.strip_u32("fragment begin")?;
        }

        packet.body = footers.into_body().to_vec();
        Ok(packet)
    }
}

/// Strips big-endian footer fields from the end of a datagram
struct FooterReader<'a> {
    data: &'a [u8],
    end: usize,
}

impl<'a> FooterReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            end: data.len(),
        }
    }

    fn remaining(&self) -> usize {
        self.end - PACKET_HEADER_SIZE
    }

    fn strip(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], PacketError> {
        if self.remaining() < needed {
            return Err(PacketError::TruncatedFooter {
                field,
                needed,
                remaining: self.remaining(),
            });
        }
        self.end -= needed;
        Ok(&self.data[self.end..self.end + needed])
    }

    fn strip_bytes(&mut self, length: usize) -> &'a [u8] {
        self.end -= length;
        &self.data[self.end..self.end + length]
    }

    fn strip_u8(&mut self, field: &'static str) -> Result<u8, PacketError> {
        Ok(self.strip(field, 1)?[0])
    }

    fn strip_i16(&mut self, field: &'static str) -> Result<i16, PacketError> {
        let bytes = self.strip(field, 2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn strip_u32(&mut self, field: &'static str) -> Result<u32, PacketError> {
        let bytes = self.strip(field, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn strip_i32(&mut self, field: &'static str) -> Result<i32, PacketError> {
        let bytes = self.strip(field, 4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn into_body(self) -> &'a [u8] {
        &self.data[PACKET_HEADER_SIZE..self.end]
    }
}
