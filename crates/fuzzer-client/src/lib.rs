pub mod client;

pub use client::{ClientOptions, ReqwestClient};
