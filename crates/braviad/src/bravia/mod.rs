//! Client for the Sony Bravia REST API

mod client;
pub mod protocol;

pub use client::BraviaClient;
pub use client::DeviceClient;
#[cfg(test)]
pub use client::MockBravia;
pub use protocol::Application;
pub use protocol::BraviaError;
pub use protocol::PlayingContent;
pub use protocol::PowerStatus;
pub use protocol::RemoteCode;
pub use protocol::VolumeInfo;
