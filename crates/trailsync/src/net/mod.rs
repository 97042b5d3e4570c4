mod memory;
mod protocol;
mod registry;
mod stats;
mod transport;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use protocol::{
    ArchivedMessage, ArchivedPacket, DEFAULT_PORT, MAX_DATAGRAM_SIZE, Message, MessageKind,
    PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError, PacketHeader,
};
pub use registry::{Peer, PlayerRegistry, RegistryError};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use transport::{Transport, UdpTransport};
