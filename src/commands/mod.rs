pub(crate) mod daemon;
pub(crate) mod output;
pub(crate) mod package;
pub(crate) mod service;
