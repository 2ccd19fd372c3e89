pub mod density;
pub mod pupils;
pub mod table;
