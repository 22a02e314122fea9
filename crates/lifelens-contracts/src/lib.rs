pub mod decision;
pub mod image;
pub mod models;
pub mod records;
pub mod request;
pub mod tier;

pub use decision::{Category, DecisionContext, DecisionResult, RankedOption, Weather};
pub use image::{ImageDescriptor, ImageInput, SourceProvider};
pub use request::{DecisionRequest, ValidatedRequest, ValidationError};
pub use tier::{QuotaStatus, Tier, UsageKind};
