pub mod global_variables;
pub mod http;
pub mod stac;
