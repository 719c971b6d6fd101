mod base;
mod consumer;
mod publisher;
mod relay;

pub use base::*;
pub use consumer::*;
pub use publisher::*;
pub use relay::*;
