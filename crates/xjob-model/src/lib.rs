mod constants;
pub use constants::{DEFAULT_MAX_QUEUE_DEPTH, TOKEN_HEADER};

mod error;
pub use error::ModelError;

mod clock;
pub use clock::now_ms;

mod domain;
pub use domain::*;
