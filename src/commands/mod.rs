pub mod init_db;
pub mod serve;

pub use init_db::init_db;
pub use serve::serve;
