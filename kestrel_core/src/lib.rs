//! The core library for the [Kestrel](https://github.com/kestrel-rt/kestrel) JavaScript runtime.

pub mod cli;
pub mod err;
pub mod evloop;
pub mod js;
pub mod log;
pub mod prelude;
