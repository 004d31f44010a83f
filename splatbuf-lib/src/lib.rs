
pub mod bucket;
pub mod buffer;
pub mod covariance;
pub mod header;
pub mod layout;
pub mod sh;
pub mod splat;
pub mod writer;
