pub mod collection;
pub mod fs;
pub mod migrations;
pub mod object_store;
pub mod s3;
pub mod sqlite;
pub mod temp;
