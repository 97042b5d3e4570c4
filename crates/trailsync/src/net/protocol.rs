use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::{EntityId, Frame, PlayerId};

pub const MAX_DATAGRAM_SIZE: usize = 65507;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5453_5331;
pub const DEFAULT_PORT: u16 = 27015;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }
}

impl PacketHeader {
    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Leading byte of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    JoinRequest = 1,
    JoinAccepted = 2,
    JoinDenied = 3,
    Leave = 4,
    Command = 5,
    Synchronize = 6,
    GameStateRequest = 7,
    GameStateResponse = 8,
    AddGameObject = 9,
    RemoveGameObject = 10,
    HashCheck = 11,
    PlayerJoined = 12,
    PlayerLeft = 13,
}

impl MessageKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let kind = match byte {
            1 => Self::JoinRequest,
            2 => Self::JoinAccepted,
            3 => Self::JoinDenied,
            4 => Self::Leave,
            5 => Self::Command,
            6 => Self::Synchronize,
            7 => Self::GameStateRequest,
            8 => Self::GameStateResponse,
            9 => Self::AddGameObject,
            10 => Self::RemoveGameObject,
            11 => Self::HashCheck,
            12 => Self::PlayerJoined,
            13 => Self::PlayerLeft,
            _ => return None,
        };
        Some(kind)
    }
}

/// Session messages. Commands, entities and snapshots travel as bincode-encoded bytes.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    JoinRequest {
        player_name: String,
    },
    JoinAccepted {
        player: PlayerId,
        frame: Frame,
    },
    JoinDenied {
        reason: String,
    },
    Leave,
    Command {
        player: PlayerId,
        command: Vec<u8>,
    },
    /// Sent by a client with `server_frame: None`; the server echoes `sent_frame` back.
    Synchronize {
        sent_frame: Frame,
        server_frame: Option<Frame>,
    },
    GameStateRequest,
    GameStateResponse {
        snapshot: Vec<u8>,
    },
    AddGameObject {
        frame: Frame,
        entity: Vec<u8>,
    },
    RemoveGameObject {
        frame: Frame,
        entity_id: EntityId,
    },
    HashCheck {
        frame: Frame,
        hash: u64,
    },
    PlayerJoined {
        player: PlayerId,
        name: String,
    },
    PlayerLeft {
        player: PlayerId,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JoinRequest { .. } => MessageKind::JoinRequest,
            Self::JoinAccepted { .. } => MessageKind::JoinAccepted,
            Self::JoinDenied { .. } => MessageKind::JoinDenied,
            Self::Leave => MessageKind::Leave,
            Self::Command { .. } => MessageKind::Command,
            Self::Synchronize { .. } => MessageKind::Synchronize,
            Self::GameStateRequest => MessageKind::GameStateRequest,
            Self::GameStateResponse { .. } => MessageKind::GameStateResponse,
            Self::AddGameObject { .. } => MessageKind::AddGameObject,
            Self::RemoveGameObject { .. } => MessageKind::RemoveGameObject,
            Self::HashCheck { .. } => MessageKind::HashCheck,
            Self::PlayerJoined { .. } => MessageKind::PlayerJoined,
            Self::PlayerLeft { .. } => MessageKind::PlayerLeft,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub message: Message,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("empty datagram")]
    Empty,
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("message kind byte {declared:?} does not match payload {actual:?}")]
    KindMismatch {
        declared: MessageKind,
        actual: MessageKind,
    },
    #[error("bad protocol header (magic {magic:#x}, version {version})")]
    InvalidHeader { magic: u32, version: u32 },
    #[error("datagram of {0} bytes exceeds the maximum size")]
    TooLarge(usize),
}

impl Packet {
    pub fn new(message: Message) -> Self {
        Self {
            header: PacketHeader::default(),
            message,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        let body = rkyv::to_bytes::<rancor::Error>(self).map_err(PacketError::Serialize)?;

        let mut data = Vec::with_capacity(body.len() + 1);
        data.push(self.kind() as u8);
        data.extend_from_slice(&body);

        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(PacketError::TooLarge(data.len()));
        }
        Ok(data)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let (&first, body) = data.split_first().ok_or(PacketError::Empty)?;
        let declared = MessageKind::from_byte(first).ok_or(PacketError::UnknownKind(first))?;

        // Archived data must be aligned; datagram buffers are not.
        let mut aligned = AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);

        let packet =
            rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)?;

        if !packet.header.is_valid() {
            return Err(PacketError::InvalidHeader {
                magic: packet.header.magic,
                version: packet.header.version,
            });
        }
        if packet.kind() != declared {
            return Err(PacketError::KindMismatch {
                declared,
                actual: packet.kind(),
            });
        }
        Ok(packet)
    }
}
