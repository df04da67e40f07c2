mod as_value;
mod class;
mod collection;
mod delegate;
mod entity;
mod error;
mod iter;
mod key;
mod record;
mod sort;
mod value;

pub use ::anyhow::Context;
pub use as_value::*;
pub use class::*;
pub use collection::*;
pub use delegate::*;
pub use entity::*;
pub use error::*;
pub use iter::*;
pub use key::*;
pub use record::*;
pub use sort::*;
pub use value::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
