pub mod build;
pub mod check;
pub mod commands;
pub mod fetch;
pub mod formula;
pub mod formulae;
pub mod http;
pub mod layout;
pub mod process;
pub mod runtime;
