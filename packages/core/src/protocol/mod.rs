// Протокол сопряжения: фреймы, wire-формат, QR, передача чанков, транспорт

pub mod messages;
pub mod qr;
pub mod transfer;
pub mod transport;
pub mod validation;
pub mod wire;

pub use messages::{Action, Frame};
pub use transfer::ChunkAssembler;
pub use transport::{CloseCode, Timer, Transport, TransportEvent};
