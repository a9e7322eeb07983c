pub mod flow;
pub mod sender;
