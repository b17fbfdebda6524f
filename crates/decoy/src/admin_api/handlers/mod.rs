pub mod imposters;
pub mod stubs;
pub mod system;
