pub mod archive;
pub mod commands;
pub mod credential;
pub mod download;
pub mod error;
pub mod framework;
pub mod host;
pub mod http;
pub mod installer;
pub mod manifest;
pub mod package;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod source;
pub mod version;

#[cfg(test)]
pub mod test_utils;
