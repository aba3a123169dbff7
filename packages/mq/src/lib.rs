pub mod error;
mod local;
pub mod models;

pub use error::MqError;
pub use models::{BroccoliError, BrokerMessage, Delivery, MqConfig, MqQueue, init_mq};
