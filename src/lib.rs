pub use rowset_core::*;

pub use rowset_core::record;
