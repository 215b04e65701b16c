//! Application services: queries, pagination, follow edges and authoring.

pub mod chrome;
pub mod error;
pub mod feed;
pub mod follow;
pub mod pagination;
pub mod posts;
pub mod query;
pub mod repos;
