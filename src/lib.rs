//! Postline: a small server-rendered community blog with groups, comments
//! and a feed of followed authors.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
