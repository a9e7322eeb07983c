mod code_store_test;
mod helpers;
