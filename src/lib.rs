pub mod ipc;
pub mod message;
pub mod process;
pub mod protocol;

pub use ipc::Ipc;
pub use message::{Control, MediaType, Message, MessageError};
pub use process::{Address, ProcessName, ProcessNameError, SocketDir};
pub use protocol::{
    CallbackError, ClientConfig, ClientError, Continuation, Receiver, Sender, Server,
    ServerConfig, ServerError,
};
