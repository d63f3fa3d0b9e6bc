pub mod config_manager;
pub mod error;
pub mod expression;
pub mod propagation;
pub mod types;

pub use config_manager::*;
pub use error::*;
pub use expression::{Expression, ExpressionError};
pub use propagation::*;
pub use types::*;
