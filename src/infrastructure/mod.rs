pub mod crawlers;
pub mod engines;
pub mod media;
pub mod observability;
pub mod persistence;
pub mod staging;
