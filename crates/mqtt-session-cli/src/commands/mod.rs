pub mod connect_cmd;
pub mod parsers;
