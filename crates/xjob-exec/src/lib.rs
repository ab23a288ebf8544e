mod error;
pub use error::{ExecError, ExecResult};

pub mod bean;
pub use bean::BeanRunner;

pub mod prelude {
    pub use crate::BeanRunner;
    pub use crate::error::{ExecError, ExecResult};
}
