mod cache_tests;
mod common;
mod install_tests;
mod lifecycle_tests;
