//! Service layer module

pub mod classifier_service;
pub mod policy;
pub mod types;

pub use classifier_service::ClassifierService;
pub use policy::UploadPolicy;
pub use types::*;
