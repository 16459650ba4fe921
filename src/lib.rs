#![allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]

pub mod candidate;
pub mod cascade;
pub mod config;
pub mod domain;
pub mod error;
pub mod ips;
pub mod provider;
pub mod reasoning;
pub mod repository;
pub mod run;
pub mod scoring;
pub mod server;
