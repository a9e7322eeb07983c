pub mod courier;
pub mod db;
