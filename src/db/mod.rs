pub mod engines;
pub mod identity;
pub mod instance;
pub mod locks;
pub mod manager;
pub mod ports;
pub mod proxy;

pub use manager::InstanceManager;
pub use proxy::AccessProxy;
