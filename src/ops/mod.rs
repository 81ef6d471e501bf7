pub mod crop;
pub mod export;
pub mod transform;
