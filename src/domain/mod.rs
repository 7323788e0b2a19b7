// Domain layer - Plain data shared by every other layer
pub mod batch;
pub mod error;
pub mod report;
pub mod series;
