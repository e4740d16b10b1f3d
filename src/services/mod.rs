pub mod billing;
pub mod stripe;
pub mod subscription;
pub mod webhook;
