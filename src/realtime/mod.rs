pub mod dispatcher;
pub mod events;
pub mod hub;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use events::{ClientMessage, ErrorCode, ErrorFrame, SubscribeAck};
pub use hub::Hub;
pub use webhook::WebhookSender;
