pub(crate) mod channel;
#[cfg(target_os = "linux")]
pub(crate) mod linux;
pub(crate) mod sim;
pub(crate) mod supervisor;

pub use self::channel::{CanInterface, LinkError};
#[cfg(target_os = "linux")]
pub use self::linux::SocketCanBus;
pub use self::sim::{SimReceiver, SimReceiverConfig, SimReceiverHandle};
pub use self::supervisor::LinkSupervisor;
