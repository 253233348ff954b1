use std::time::Duration;

use async_trait::async_trait;
use socketcan::tokio::CanSocket;
use socketcan::{CanFrame as RawFrame, EmbeddedFrame, ExtendedId, Id};
use tracing::{debug, instrument, warn};

use crate::bus::channel::{CanInterface, LinkError};
use crate::codec::CanFrame;

/// A SocketCAN channel bound to one network interface.
///
/// Opening and resetting shell out to `ip link`, so the process needs
/// `CAP_NET_ADMIN` (or an interface that is already up).
pub struct SocketCanBus {
    socket: CanSocket,
    interface: String,
    bitrate: u32,
}

impl SocketCanBus {
    /// Opens the interface, bringing the link up first when the plain open
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns an error when the interface cannot be opened even after a
    /// link bring-up.
    #[instrument(level = "debug", skip(bitrate))]
    pub async fn open(interface: &str, bitrate: u32) -> Result<Self, LinkError> {
        let socket = match CanSocket::open(interface) {
            Ok(socket) => socket,
            Err(error) => {
                warn!(%error, interface, "CAN open failed; bringing the link up");
                link_up(interface, bitrate).await?;
                CanSocket::open(interface).map_err(|error| LinkError::Open {
                    interface: interface.to_string(),
                    detail: error.to_string(),
                })?
            }
        };

        Ok(Self {
            socket,
            interface: interface.to_string(),
            bitrate,
        })
    }
}

#[async_trait]
impl CanInterface for SocketCanBus {
    async fn send(&mut self, frame: &CanFrame) -> Result<(), LinkError> {
        let id = ExtendedId::new(frame.id()).ok_or(LinkError::InvalidFrame { id: frame.id() })?;
        let raw = RawFrame::new(Id::Extended(id), frame.data())
            .ok_or(LinkError::InvalidFrame { id: frame.id() })?;

        self.socket
            .write_frame(raw)
            .await
            .map_err(|error| LinkError::Channel {
                operation: "send",
                detail: error.to_string(),
            })
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, LinkError> {
        let Ok(received) = tokio::time::timeout(timeout, self.socket.read_frame()).await else {
            return Ok(None);
        };

        match received {
            // Remote and error frames carry no update payload.
            Ok(RawFrame::Data(frame)) => {
                let id = match frame.id() {
                    Id::Standard(id) => u32::from(id.as_raw()),
                    Id::Extended(id) => id.as_raw(),
                };
                Ok(Some(CanFrame::new(id, frame.data()).map_err(|_invalid| {
                    LinkError::InvalidFrame { id }
                })?))
            }
            Ok(_other) => Ok(None),
            Err(error) => Err(LinkError::Channel {
                operation: "receive",
                detail: error.to_string(),
            }),
        }
    }

    async fn reset(&mut self) -> Result<(), LinkError> {
        debug!(interface = %self.interface, "cycling the CAN link");
        run_ip_link(&self.interface, &["down"]).await?;
        link_up(&self.interface, self.bitrate).await?;
        self.socket = CanSocket::open(&self.interface).map_err(|error| LinkError::Open {
            interface: self.interface.clone(),
            detail: error.to_string(),
        })?;
        Ok(())
    }
}

async fn link_up(interface: &str, bitrate: u32) -> Result<(), LinkError> {
    let bitrate = bitrate.to_string();
    run_ip_link(interface, &["up", "type", "can", "bitrate", &bitrate]).await
}

async fn run_ip_link(interface: &str, action: &[&str]) -> Result<(), LinkError> {
    let mut command = tokio::process::Command::new("ip");
    command.args(["link", "set", interface]).args(action);

    let output = command.output().await.map_err(LinkError::Io)?;
    if output.status.success() {
        return Ok(());
    }

    Err(LinkError::LinkCommand {
        interface: interface.to_string(),
        action: action.join(" "),
        detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
