//! Integration tests for history replication and the mapped repository

mod mapped_adapter;
mod replication;
mod support;
