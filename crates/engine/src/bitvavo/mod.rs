pub mod rest;

pub use rest::BitvavoClient;
