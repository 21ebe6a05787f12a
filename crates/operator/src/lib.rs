//! Droplet operator: the `Droplet` resource, the desired state of its child
//! objects, and the driver and controller that keep them in sync.
//!
//! A droplet runs a php-fpm Drupal tier behind an nginx front. Each pass of
//! [`driver::reconcile`] walks the children in a fixed order (secret first,
//! its resource version feeds the drupal pod template) and hands each one to
//! the object syncer with a mutation function from [`drupal`] or [`nginx`].

#![forbid(unsafe_code)]

pub mod build;
pub mod component;
pub mod config;
pub mod controller;
pub mod defaults;
pub mod driver;
pub mod drupal;
pub mod nginx;
pub mod pod;
pub mod templates;
pub mod types;

pub use component::Component;
pub use config::{ReconcileConfig, Settings};
pub use driver::{reconcile, Step};
pub use types::{Droplet, DropletSpec, DropletStatus};
