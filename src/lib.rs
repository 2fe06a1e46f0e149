pub mod cli;
pub mod gateway;
pub mod jwt;
pub mod session;
pub mod token;
