pub mod error;
pub mod gateway;
pub mod money;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use gateway::{GatewayError, IntentParams, ProcessorGateway};
pub use provider::PaymentProcessor;
pub use providers::StripeProcessor;
