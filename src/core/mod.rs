//! Domain types, vocabularies and configuration

pub mod config;
pub mod frontmatter;
pub mod model;
pub mod schema;
