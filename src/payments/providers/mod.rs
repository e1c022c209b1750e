pub mod stripe;

pub use stripe::StripeProcessor;
