pub mod correction;
pub mod db;
pub mod local_time;
pub mod observed;
mod routes;
mod service;
mod startup;
mod utils;
pub mod verification;

pub use db::*;
pub use routes::*;
pub use service::*;
pub use startup::*;
pub use utils::*;
