//! Category worklists and throttled, templated direct messages.
//!
//! Pipeline: [`worklist::build_worklist`] merges category exports,
//! [`worklist::load_pending`] picks the users still to contact, and
//! [`sender::DmSender`] messages them one at a time through a
//! [`platform::DirectMessenger`], appending every attempt to the
//! [`send_log`].

pub mod config;
pub mod logging;
pub mod model;
pub mod output;
pub mod platform;
pub mod send_log;
pub mod sender;
pub mod templates;
pub mod worklist;
