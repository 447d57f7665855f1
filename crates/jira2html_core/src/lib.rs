pub mod authors;
pub mod config;
pub mod doc_index;
pub mod generate;
pub mod issues;
pub mod keys;
pub mod links;
pub mod markup;
pub mod redirect;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod site;
