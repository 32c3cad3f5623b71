pub mod configurator;
pub mod transform;

pub use configurator::{HostRegistry, ProxyConfigurator};
pub use transform::{ResponseTransformer, apply_chain};
