//! Conversational profile collection
//!
//! - `fields`: the field registry and never-deleting field map
//! - `consent`: confirm/reject classification for research proposals
//! - `inference`: values read straight off a message
//! - `engine`: the per-turn state machine

pub mod consent;
pub mod engine;
pub mod fields;
pub mod inference;

pub use consent::{classify, ConsentSignal};
pub use engine::{
    DialogueEngine, DialogueState, DialogueTurn, PendingResearch, ResearchOrigin, ResearchTask,
    TurnKind,
};
pub use fields::{FieldContent, FieldGroup, FieldMap, ProfileField, Provenance};
