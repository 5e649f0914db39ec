//! Configuration shared by the library and the command line.

pub mod scenario;
