//! # docgen
//!
//! Turns a source repository into generated documentation.
//!
//! A client connects over WebSocket and sends a repository location. The
//! server clones it, walks the tree, packs relevant source files into a
//! size-bounded prompt, submits the prompt to a generative-text backend,
//! stores the resulting markdown, and narrates every step back to the
//! client as plain-text progress frames.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌─────────┐
//! │  Cloner  │──▶│  Walker  │──▶│ PromptDoc    │──▶│ Generator │──▶│ Storer  │
//! │ git/fake │   │ + filter │   │ word budget  │   │  Gemini   │   │ fs / S3 │
//! └──────────┘   └──────────┘   └──────────────┘   └───────────┘   └─────────┘
//!        ▲                                                              │
//!        │                 Session loop (one per connection)            │
//!        └────────── progress events ──▶ WebSocket frames ◀─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=...
//! docgen check                  # validate config and credentials
//! docgen ingest ./some/repo     # print the prompt that would be sent
//! docgen serve                  # start the HTTP/WebSocket server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy shared by collaborators |
//! | [`filter`] | Extension allow-list and glob exclusions |
//! | [`estimate`] | Word-count size estimate |
//! | [`prompt`] | Size-bounded prompt document |
//! | [`walker`] | Deterministic tree walk and prompt assembly |
//! | [`progress`] | Progress events and reporters |
//! | [`workspace`] | Per-connection working directory |
//! | [`fetch`] | Repository cloning |
//! | [`generate`] | Generation backend client |
//! | [`storage`] | Result storage (local, S3, memory) |
//! | [`session`] | Per-connection session loop |
//! | [`server`] | HTTP/WebSocket transport |

pub mod config;
pub mod error;
pub mod estimate;
pub mod fetch;
pub mod filter;
pub mod generate;
pub mod progress;
pub mod prompt;
pub mod server;
pub mod session;
pub mod storage;
pub mod walker;
pub mod workspace;
