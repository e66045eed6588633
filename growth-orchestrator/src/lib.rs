// Shared vocabulary
pub mod chat;
pub mod config;
pub mod error;
pub mod text;

// External capabilities (web search, structured completion)
pub mod providers;

// Conversational profile collection
pub mod dialogue;

// Analysis pipeline
pub mod pipeline;

// Task expansion, scoped chats and assists
pub mod expansion;

// Persistence and accounts
pub mod auth;
pub mod database;

// Worker side of the process boundary
pub mod cli;
pub mod worker;

// Client side of the process boundary
pub mod runtime;
pub mod session;
