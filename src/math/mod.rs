pub mod fee;
pub mod muldiv;
pub mod sale_rate;
