//! ffstage core library.
//!
//! Domain logic shared by the staging and session servers: the in-memory
//! buffer registry, command-template rewriting, progress-line parsing and
//! supervision of the external transcoding tool. Nothing here touches a
//! network socket.

pub mod error;
pub mod extension;
pub mod progress;
pub mod range;
pub mod registry;
pub mod template;
pub mod transcode;
