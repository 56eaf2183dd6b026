// src/lib.rs

pub mod docx;
pub mod pipeline;
pub mod store;
pub mod vars;
