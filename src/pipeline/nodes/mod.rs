//! Built-in filters.

pub mod coordinate_align;
pub mod downsample;
pub mod multiplexer;

pub use coordinate_align::{CoordinateAlign, Matrix3, IDENTITY};
pub use downsample::Downsample;
pub use multiplexer::{XyzMultiplexer, ACCELEROMETER_PORT, GYROSCOPE_PORT, MAGNETOMETER_PORT};
