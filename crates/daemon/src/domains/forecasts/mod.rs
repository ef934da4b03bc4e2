mod bom;
mod wu;

pub use bom::*;
pub use wu::*;
