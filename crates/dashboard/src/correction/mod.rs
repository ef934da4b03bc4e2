pub mod bias;
pub mod inversion;
pub mod nowcast;
pub mod regime;
pub mod resolver;

pub use bias::{BiasLookup, BiasTable};
pub use inversion::{detect_inversion, detect_overnight_inversion, InversionState, OvernightInversion};
pub use nowcast::{nowcast, NowcastContext, NowcastCorrection};
pub use regime::{classify, RegimeInputs};
pub use resolver::{resolve, ResolvedTemps, ResolverInputs};
