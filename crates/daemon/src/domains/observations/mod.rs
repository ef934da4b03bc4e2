mod pws;

pub use pws::*;
