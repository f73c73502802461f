//! エッジ端末（Raspberry Pi）との永続接続

pub mod button;
pub mod openssh;
pub mod session;
pub mod transport;

pub use button::ButtonListener;
pub use openssh::OpenSshTransport;
pub use session::RemoteSessionManager;
pub use transport::{CommandOutput, RemoteChannel, RemoteError, RemoteTransport};
