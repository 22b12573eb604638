pub mod confirmation;
pub mod error;
pub mod fee;
pub mod gateway;
pub mod payfast;
pub mod payment_service;
pub mod stripe;
