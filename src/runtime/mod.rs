mod channel;
mod context;
mod item;
mod services;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use context::{ExecutionContext, RunInfo, Tally, average_time, estimated_time};
pub use item::Item;
pub use services::{Services, ServicesFactory};
