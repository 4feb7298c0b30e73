//! grc-acl - access-control propagation for governance, risk and compliance records
//!
//! This library provides the ACL engine, its storage and its HTTP surface.
//! It exposes all modules for testing purposes.

pub mod acl;
pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;
pub mod web;
