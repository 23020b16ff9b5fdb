// src/lib.rs - Library root for climatechat

pub mod chat;
pub mod cli;
pub mod infra;
pub mod transport;
pub mod util;
