pub mod client;
pub mod types;


pub use client::{ProbeClient, check_ceilings};
pub use types::*;
