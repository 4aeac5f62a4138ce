pub use lib_minih3::*;
