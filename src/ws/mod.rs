pub mod chat;
pub mod counter;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod handler;
pub mod registry;
pub mod room;
pub mod session;

pub use chat::ChatRoom;
pub use counter::CounterRoom;
pub use echo::EchoRoom;
pub use error::SessionError;
pub use registry::{ConnectionId, ConnectionRegistry, RegistryEntry, Registration};
pub use room::{Room, SessionCtx};
