//! Atelier — live collaboration coordinator back-end.
//!
//! ## Overview
//!
//! The coordinator is the shared real-time brain of a multi-agent coding
//! dashboard: agents claim advisory file locks, snapshot file contents as
//! checkpoints, run shell commands in tracked terminal sessions, and stream
//! live editing activity to every connected observer over a WebSocket.
//! All state is in-memory and lives only as long as the process.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ (agents, │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! │dashboard)│ WebSocket│         │                                        │
//! └──────────┘          │         ├─ locks.rs        LockManager           │
//!                       │         ├─ checkpoints.rs  CheckpointStore       │
//!                       │         ├─ sessions.rs     CollaborationTracker  │
//!                       │         ├─ memory.rs       MemoryStore           │
//!                       │         ├─ process.rs      ProcessRunner         │
//!                       │         │        │ output events                 │
//!                       │         v        v                               │
//!                       │  hub.rs  (BroadcastHub: fan-out + live sessions) │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  ws.rs  (WsMessage envelope, socket loop,        │
//!                       │          legacy inbound frame compatibility)     │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | Shared types: `Lock`, `Checkpoint`, `LiveEvent`, phases |
//! | `hub`         | `tokio::sync::broadcast` fan-out + live session ledger  |
//! | `ws`          | Outbound `WsMessage` + inbound `ClientFrame` decoding   |
//!
//! ## Typical Flow (agent edits a file)
//!
//! 1. `POST /api/locks/acquire` → `LockManager::acquire()`; contended
//!    requests are rejected with the holder's id, never queued.
//! 2. `POST /api/checkpoints` snapshots the pre-edit content verbatim.
//! 3. The agent streams `liveUpdate` frames over `/ws`; `ws.rs` normalizes
//!    them onto `LiveEvent` and `BroadcastHub::publish()` fans them out,
//!    registering the live session on first sight.
//! 4. A terminal kicked off via `POST /api/terminal/start` emits
//!    `ProcessOutput` frames through the same hub until the command exits.
//! 5. `POST /api/locks/release` frees the file; observers see
//!    `LockReleased` and refresh their lock badges.

pub mod api;
pub mod checkpoints;
pub mod hub;
pub mod locks;
pub mod memory;
pub mod models;
pub mod process;
pub mod server;
pub mod sessions;
pub mod ws;
