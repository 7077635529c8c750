use crate::types::ReplyId;

use super::BundleError;

const KIND_SIZE: usize = 1;
const REPLY_ID_SIZE: usize = 4;
const LENGTH_SIZE: usize = 4;

/// How a framed message is routed on delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Plain,
    /// Expects a reply addressed to the carried reply id
    Request,
    /// Answers the request with the carried reply id
    Reply,
}

impl MessageKind {
    fn to_u8(self) -> u8 {
        match self {
            MessageKind::Plain => 0,
            MessageKind::Request => 1,
            MessageKind::Reply => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageKind::Plain),
            1 => Some(MessageKind::Request),
            2 => Some(MessageKind::Reply),
            _ => None,
        }
    }

    fn has_reply_id(self) -> bool {
        self != MessageKind::Plain
    }
}

/// Size of the framing placed before a message payload
pub fn header_size(kind: MessageKind) -> usize {
    if kind.has_reply_id() {
        KIND_SIZE + REPLY_ID_SIZE + LENGTH_SIZE
    } else {
        KIND_SIZE + LENGTH_SIZE
    }
}

/// Offset of the reply id from the start of a framed message
pub(crate) const REPLY_ID_OFFSET: usize = KIND_SIZE;

/// Frames a message as `[kind u8][reply id u32]?[length u32][payload]`
pub fn frame_message(kind: MessageKind, reply_id: ReplyId, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(header_size(kind) + payload.len());
    framed.push(kind.to_u8());
    if kind.has_reply_id() {
        framed.extend_from_slice(&reply_id.to_be_bytes());
    }
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// A message as delivered by the receiver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub kind: MessageKind,
    pub reply_id: Option<ReplyId>,
    pub data: Vec<u8>,
}

/// Splits the concatenated payload of a delivered bundle into messages
pub fn read_messages(mut data: &[u8]) -> Result<Vec<RawMessage>, BundleError> {
    let mut messages = Vec::new();

    while !data.is_empty() {
        let kind = MessageKind::from_u8(data[0])
            .ok_or(BundleError::UnknownMessageKind { kind: data[0] })?;
        let header = header_size(kind);
        if data.len() < header {
            return Err(BundleError::TruncatedMessage {
                needed: header,
                remaining: data.len(),
            });
        }

        let mut cursor = KIND_SIZE;
        let reply_id = if kind.has_reply_id() {
            let bytes = &data[cursor..cursor + REPLY_ID_SIZE];
            cursor += REPLY_ID_SIZE;
            Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        } else {
            None
        };
        let bytes = &data[cursor..cursor + LENGTH_SIZE];
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        cursor += LENGTH_SIZE;

        if data.len() - cursor < length {
            return Err(BundleError::TruncatedMessage {
                needed: length,
                remaining: data.len() - cursor,
            });
        }
        messages.push(RawMessage {
            kind,
            reply_id,
            data: data[cursor..cursor + length].to_vec(),
        });
        data = &data[cursor + length..];
    }

    Ok(messages)
}
