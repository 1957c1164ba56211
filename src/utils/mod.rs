mod logs;

pub use logs::*;
