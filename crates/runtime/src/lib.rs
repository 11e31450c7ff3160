//! Read graph runtime & session store
//!
//! The read path of the memory engine as a stateful dataflow
//! (route → split → expand → retrieve → verify → summarise → persist)
//! plus the short-term session buffer it consults and updates.

pub mod graph;
pub mod prompts;
pub mod session;
pub mod state;

pub use graph::{ReadEvent, ReadRequest, ReadResponse, ReadRuntime, ReadRuntimeConfig};
pub use session::{SessionConfig, SessionStore, SessionTurn};
pub use state::{IntermediateOutput, ReadState, SearchSwitch, SubQuestion};
