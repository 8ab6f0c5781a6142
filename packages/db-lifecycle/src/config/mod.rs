pub mod db;
pub mod options;
