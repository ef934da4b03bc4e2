mod dashboard_client;
mod domains;
mod fetcher;
mod ingest;
mod payloads;
mod utils;

pub use dashboard_client::*;
pub use domains::*;
pub use fetcher::*;
pub use ingest::*;
pub use payloads::*;
pub use utils::*;
