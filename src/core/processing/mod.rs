pub mod indices;
pub mod locate;
pub mod mask;
pub mod pipeline;
pub mod roi;
pub mod stats;
pub mod transfer;
pub mod validation;
