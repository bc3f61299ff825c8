// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Control daemon library for the ROCK Pi Penta SATA HAT top board.
//!
//! The sampler thread ([`button`]) classifies key gestures and hands them to the
//! control loop ([`control`]) over the queue in [`coord`]. The loop drives the fans
//! ([`fan`]) and the status slider ([`display`]), pulling slow lookups through
//! [`cache::TtlCache`].

pub mod board;
pub mod boot;
pub mod button;
pub mod cache;
pub mod command;
pub mod config;
pub mod control;
pub mod coord;
pub mod display;
pub mod fan;
pub mod telemetry;
