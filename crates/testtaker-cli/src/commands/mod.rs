pub mod demo;
pub mod forget;
pub mod init;
pub mod session;
pub mod status;
pub mod take;
