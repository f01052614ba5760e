pub use concord_core::model::{PeerId, Signal};

pub mod model {
    pub use concord_core::model::*;
    pub use concord_core::utils;
}

#[cfg(feature = "engine")]
pub mod engine {
    pub use concord_engine::*;
}
