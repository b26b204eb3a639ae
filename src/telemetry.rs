mod codec;
mod measurement;
mod reading;

pub use codec::*;
pub use measurement::*;
pub use reading::*;
