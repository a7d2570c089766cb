pub mod bravia;
pub mod bus;
pub mod config;
pub mod device;
pub mod supervisor;

pub use config::Cli;
pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use device::Device;
pub use device::DeviceSettings;
pub use device::DeviceState;
