//! Service layer: the S3 repository, its object store seam, validation of
//! instance settings, and persistence of instances.

pub mod instance_service;
pub mod object_store;
pub mod repository;
pub mod s3_client;
pub mod validation;
