#![doc(html_root_url = "https://docs.rs/islands-dom/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! An island runtime for the DOM.
//!
//! Islands are independently rendered component trees inside an otherwise static or differently
//! rendered page. Each one lives in a host element carrying `data-fict-react-*` attributes, is
//! optionally server-rendered, and is mounted on the client once its [`ClientStrategy`] fires.
//!
//! There are two ways in:
//!
//! - [`reactify`], [`reactify_by_locator`] and [`island`] create islands from a host framework's
//!   [`ReactiveScope`], keeping their props in sync.
//! - [`install_loader`] finds marked hosts in a [`Document`](`platform::Document`) and keeps mounting
//!   and unmounting them as the document changes.
//!
//! Everything environmental goes through [`platform`]. [`web`] implements it for browsers and
//! [`testing`] implements it in memory.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod action;
pub mod attributes;
pub mod context;
pub mod error;
pub mod island;
pub mod loader;
pub mod locator;
pub mod module;
pub mod platform;
pub mod policy;
pub mod props;
pub mod retry;
pub mod root;
pub mod serialization;
pub mod strategy;
pub mod testing;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use action::{invoke, make_action_reference, ActionRef};
pub use context::Context;
pub use error::{Error, LoadKind};
pub use island::{island, reactify, reactify_by_locator, IslandOptions, IslandProps, LocatorIslandOptions};
pub use loader::{install_loader, Loader, LoaderOptions};
pub use locator::create_locator;
pub use module::{Component, Module, ModuleRegistry};
pub use props::{PropValue, Props};
pub use strategy::ClientStrategy;
