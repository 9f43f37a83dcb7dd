pub mod cookies;
pub mod crypto;
pub mod handlers;
pub mod keys;
pub mod launch;
pub mod ltik;
pub mod persist;
pub mod redirect;
pub mod registry;
pub mod service;
pub mod validate;
