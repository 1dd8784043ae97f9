#![no_std]
extern crate alloc;

pub use ruint::aliases::U256;

pub mod amm;
pub mod engine;
pub mod math;
pub mod reward;
pub mod state;
pub mod time_bitmap;
pub mod types;
