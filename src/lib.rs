//! Vacant-slot poller for the Yokohama city facility reservation site.

pub mod cli;
pub mod config;
pub mod diff;
pub mod fmt;
pub mod logging;
pub mod output;
pub mod runner;
pub mod shisetsu;
pub mod utils;
