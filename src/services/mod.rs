pub mod availability;
pub mod booking;
pub mod catalog;
pub mod payment;
pub mod pricing;
pub mod validator;
