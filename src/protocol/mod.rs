pub mod command;
pub mod packet;
pub mod primitive;
pub mod response;
pub mod row;
pub mod value;

pub use packet::{PacketStream, Transport};
pub use response::Framing;
