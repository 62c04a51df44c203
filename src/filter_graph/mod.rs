//! The post-process filter graph.
//!
//! A [`FilterGraph`] turns an ordered list of [`StageDescriptor`]s into live
//! stages. Every stage except the terminal one owns an off-screen target, a
//! private root holding an orthographic camera and a full-screen quad, and an
//! output texture. The terminal stage owns nothing: its quad is the lit
//! buffer's texture card, moved onto the overlay root so it lands on screen.
//!
//! ```text
//!  G-buffer / lit / forward textures ──┐ common inputs
//!                                      ▼
//! ┌────────┐   ┌────────────┐   ┌────────────┐        ┌──────────────────┐
//! │ stage0 │──▶│   stage1   │──▶│   stage2   │─ ... ─▶│ terminal (card)  │──▶ screen
//! │ target │   │   target   │   │   target   │        │ lit buffer card  │
//! └────────┘   └────────────┘   └────────────┘        └──────────────────┘
//!      │  output textures are published as common inputs under the
//!      └─ stage name, and translations rebind them under a new name
//! ```
//!
//! # Binding order
//!
//! Every (re)bind of a stage writes, in order:
//!
//! 1. its declared inputs (texture paths are loaded first),
//! 2. the common inputs, including every stage's published output,
//! 3. its translations `earlier_stage -> input_name`.
//!
//! A later write wins on a name collision.
//!
//! # Failure model
//!
//! Descriptor lists are validated before the host is touched, so a bad name
//! or translation never leaves a half-built graph. Resource failures during
//! `build` tear down what was already created. Incremental mutations resolve
//! shaders and textures before binding anything, so a failure leaves the
//! stage exactly as it was.

mod descriptor;
mod graph;
mod stage;

pub use descriptor::StageDescriptor;
pub use graph::{FINAL_LIGHT_STAGE, FILTER_TARGET_SORT, FilterGraph, StageSources};
pub use stage::FilterStage;
