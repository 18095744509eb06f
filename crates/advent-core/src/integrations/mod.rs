pub mod telegram;
pub mod traits;

pub use telegram::{TelegramTransport, UpdatePoller};
pub use traits::{ChatId, InboundRequest, Transport};
