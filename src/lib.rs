//! Wallet-based sign-in and session management for the Sandbox API.
//!
//! A [`session::SessionManager`] drives one wallet session through
//! `idle -> connecting -> connected -> signing -> success | error`, talking to
//! browser-style wallet extensions ([`wallet`]) and the remote auth gateway
//! ([`gateway`]), and persisting bearer tokens between runs.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod settings;
pub mod wallet;
