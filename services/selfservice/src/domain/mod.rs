pub mod code;
pub mod repository;
pub mod template;
pub mod text;
pub mod types;
