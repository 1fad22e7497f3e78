pub mod config;
pub mod error;
pub mod model;
pub mod router;
pub mod topics;

pub use config::{
    BrokerConfig, Button, ButtonAction, ButtonBinding, ChannelSpec, DeviceConfig, DeviceProfile,
    LoopConfig, TopicSpec,
};
pub use error::{ConfigError, DecodeError, ModelError, RegisterError, RouteError};
pub use model::Environment;
pub use router::{Decode, TopicBinding, TopicRouter};
pub use topics::*;
