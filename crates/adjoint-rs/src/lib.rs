mod env;
pub mod error;
pub mod tape;
pub mod value;

pub use error::{TapeError, TapeResult};
pub use tape::{index_slot, IndexSlot, NodeId, Tape, TapeStats};
pub use value::{safe_fmadd, safe_mul, TapeValue, Vector};
