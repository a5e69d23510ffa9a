//! Image drop-and-compose canvas core.
//!
//! Users drop image files or URLs onto a responsive canvas (or pick a file),
//! the images land in a fixed-size virtual scene, and the composed scene can be
//! exported as a PNG at a resolution that does not depend on the current
//! on-screen zoom. This crate owns the part of that flow with real invariants:
//! coordinate conversion between viewport pixels and scene units, the ordered
//! placement store, asynchronous ingestion with liveness tickets, and export.
//! Drawing, selection handles and file-input chrome belong to the host.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Event dispatcher: applies [`session::Event`]s, returns [`session::Action`]s |
//! | [`runtime`] | Single-threaded event loop that runs reads/decodes and feeds results back |
//! | [`viewport`] | Scene size, container measurement and the viewport scale factor |
//! | [`pointer`] | Viewport-pixel ⇄ scene coordinate mapping |
//! | [`ingest`] | Drop/selection validation, read tickets and the ordering buffer |
//! | [`store`] | Placements and the append-only placement store |
//! | [`decode`] | Source fetching/decoding and the per-placement image cache |
//! | [`export`] | Supersampled rasterization and PNG encoding |
//! | [`config`] | Canvas configuration and validation |
//! | [`consts`] | Shared constants (scene size, supersample factor, file name) |

pub mod config;
pub mod consts;
pub mod decode;
pub mod export;
pub mod ingest;
pub mod pointer;
pub mod runtime;
pub mod session;
pub mod store;
pub mod viewport;
